//! Zero points: named offsets an operator can define, persisted as XML.
//!
//! Mirrors `original_source/ZeroPointManager.py`: a flat `<ZeroPoints>`
//! document of `<ZeroPoint>` entries, each with `<Number>`, `<Name>`, and
//! `<Offset>`. Creating a new zero point appends it and rewrites the whole
//! file; `number` is always `existing_count + 1`, never reused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named zero-point offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ZeroPoint")]
pub struct ZeroPoint {
    #[serde(rename = "Number")]
    pub number: u32,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Offset")]
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ZeroPoints")]
struct ZeroPointDocument {
    #[serde(rename = "ZeroPoint", default)]
    zero_points: Vec<ZeroPoint>,
}

/// Error type for zero-point file I/O.
#[derive(Debug, Error)]
pub enum ZeroPointError {
    #[error("zero point file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zero point file is not valid XML: {0}")]
    Deserialize(#[from] quick_xml::DeError),

    #[error("failed to render zero point file as XML: {0}")]
    Serialize(#[from] quick_xml::SeError),

    #[error("zero point file has no entries")]
    Empty,

    #[error("zero point index {0} out of range (have {1} entries)")]
    IndexOutOfRange(usize, usize),
}

/// Shared, mutable collection of zero points plus whichever one is active.
///
/// The active zero point's `offset` feeds `Position::offset`; selecting a
/// different one or creating a new one takes effect on the supervisor's
/// next loop iteration, matching the source manager's behavior of holding
/// one "current" zero point at a time.
#[derive(Debug, Clone)]
pub struct ZeroPointStore {
    path: PathBuf,
    inner: Arc<RwLock<State>>,
}

#[derive(Debug)]
struct State {
    zero_points: Vec<ZeroPoint>,
    active_index: usize,
}

impl ZeroPointStore {
    /// Load zero points from `path`, creating it with a single `Default`
    /// entry at offset `0.0` if the file does not exist, and activate the
    /// first entry.
    pub fn load_or_create(path: &Path) -> Result<Self, ZeroPointError> {
        let zero_points = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let doc: ZeroPointDocument = quick_xml::de::from_str(&contents)?;
            if doc.zero_points.is_empty() {
                return Err(ZeroPointError::Empty);
            }
            doc.zero_points
        } else {
            let defaults = vec![ZeroPoint {
                number: 1,
                name: "Default".to_string(),
                offset: 0.0,
            }];
            write_document(path, &defaults)?;
            defaults
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(RwLock::new(State {
                zero_points,
                active_index: 0,
            })),
        })
    }

    /// The offset of the currently active zero point.
    #[must_use]
    pub fn active_offset(&self) -> f64 {
        let state = self.inner.read();
        state.zero_points[state.active_index].offset
    }

    /// The currently active zero point, cloned.
    #[must_use]
    pub fn active(&self) -> ZeroPoint {
        let state = self.inner.read();
        state.zero_points[state.active_index].clone()
    }

    /// All known zero points, in file order.
    #[must_use]
    pub fn all(&self) -> Vec<ZeroPoint> {
        self.inner.read().zero_points.clone()
    }

    /// Select the zero point at `index` (0-based, file order) as active.
    pub fn select(&self, index: usize) -> Result<(), ZeroPointError> {
        let mut state = self.inner.write();
        let len = state.zero_points.len();
        if index >= len {
            return Err(ZeroPointError::IndexOutOfRange(index, len));
        }
        state.active_index = index;
        Ok(())
    }

    /// Append a new zero point named `name` at `offset`, number assigned
    /// as `existing_count + 1`, then rewrite the whole file. Does not
    /// change which zero point is active; call `select` for that.
    pub fn create(&self, name: &str, offset: f64) -> Result<ZeroPoint, ZeroPointError> {
        let mut state = self.inner.write();
        let number = u32::try_from(state.zero_points.len()).unwrap_or(u32::MAX) + 1;
        let created = ZeroPoint {
            number,
            name: name.to_string(),
            offset,
        };
        state.zero_points.push(created.clone());
        write_document(&self.path, &state.zero_points)?;
        Ok(created)
    }
}

fn write_document(path: &Path, zero_points: &[ZeroPoint]) -> Result<(), ZeroPointError> {
    let doc = ZeroPointDocument {
        zero_points: zero_points.to_vec(),
    };
    let rendered = quick_xml::se::to_string(&doc)?;
    std::fs::write(path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_creates_single_default_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_points.xml");
        let store = ZeroPointStore::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.active_offset(), 0.0);
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn create_appends_with_incremented_number_without_activating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_points.xml");
        let store = ZeroPointStore::load_or_create(&path).unwrap();

        let created = store.create("Home", 12.5).unwrap();
        assert_eq!(created.number, 2);
        assert_eq!(store.active_offset(), 0.0);
        assert_eq!(store.all().len(), 2);

        let reloaded = ZeroPointStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.all().len(), 2);
        assert_eq!(reloaded.all()[1].name, "Home");
    }

    #[test]
    fn select_switches_active_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_points.xml");
        let store = ZeroPointStore::load_or_create(&path).unwrap();
        store.create("Second", 30.0).unwrap();

        store.select(0).unwrap();
        assert_eq!(store.active_offset(), 0.0);
        store.select(1).unwrap();
        assert_eq!(store.active_offset(), 30.0);
    }

    #[test]
    fn select_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_points.xml");
        let store = ZeroPointStore::load_or_create(&path).unwrap();
        assert!(store.select(5).is_err());
    }
}
