use chrono::{SecondsFormat, Utc};

use crate::errors::OpError;
use crate::model::Doc;
use crate::store::DocIo;

/// Fixed-width UTC timestamp; lexicographic order matches chronological order.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Per-document timestamps never move backwards, even if the wall clock does.
fn monotonic_now(prev: &str) -> String {
    let now = now_rfc3339();
    if now.as_str() < prev {
        prev.to_string()
    } else {
        now
    }
}

fn decode<T: Doc>(body: serde_json::Value) -> Result<T, OpError> {
    serde_json::from_value(body).map_err(|e| {
        OpError::validation(format!("malformed {} document: {}", T::COLLECTION, e))
    })
}

fn put<T: Doc>(db: &impl DocIo, doc: &T) -> Result<(), OpError> {
    let body = serde_json::to_value(doc)
        .map_err(|e| OpError::store(format!("encode {} document: {}", T::COLLECTION, e)))?;
    db.write_doc(T::COLLECTION, doc.id(), &body)
}

pub fn find<T: Doc>(db: &impl DocIo, id: &str) -> Result<Option<T>, OpError> {
    match db.read_doc(T::COLLECTION, id)? {
        Some(body) => Ok(Some(decode::<T>(body)?)),
        None => Ok(None),
    }
}

pub fn get<T: Doc>(db: &impl DocIo, id: &str) -> Result<T, OpError> {
    find::<T>(db, id)?.ok_or_else(|| OpError::not_found(T::COLLECTION, id))
}

pub fn list<T: Doc>(db: &impl DocIo, mut pred: impl FnMut(&T) -> bool) -> Result<Vec<T>, OpError> {
    let mut out = Vec::new();
    for (_, body) in db.scan_docs(T::COLLECTION)? {
        let doc = decode::<T>(body)?;
        if pred(&doc) {
            out.push(doc);
        }
    }
    Ok(out)
}

pub fn create<T: Doc>(db: &impl DocIo, mut doc: T) -> Result<T, OpError> {
    doc.validate()?;
    if db.read_doc(T::COLLECTION, doc.id())?.is_some() {
        return Err(OpError::conflict(format!(
            "{} {} already exists",
            T::COLLECTION,
            doc.id()
        )));
    }
    let now = now_rfc3339();
    doc.set_created_at(now.clone());
    doc.set_updated_at(now);
    put(db, &doc)?;
    Ok(doc)
}

pub fn update<T: Doc>(db: &impl DocIo, mut doc: T) -> Result<T, OpError> {
    doc.validate()?;
    let prev = get::<T>(db, doc.id())?;
    doc.set_created_at(prev.created_at().to_string());
    doc.set_updated_at(monotonic_now(prev.updated_at()));
    put(db, &doc)?;
    Ok(doc)
}

pub fn delete<T: Doc>(db: &impl DocIo, id: &str) -> Result<(), OpError> {
    db.delete_doc(T::COLLECTION, id)
}
