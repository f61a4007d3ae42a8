//! Uniform write surface for writable signals.
//!
//! A setter is built from two primitives: a reader for the currently
//! displayed value and a patch-level writer. Every flavor reduces to a patch
//! list before hitting the writer, so observers on both sides of the wire
//! see the same representation regardless of how the write was phrased.

use crate::error::Result;
use crate::patch::{produce_patches, Patch};
use crate::wire::WriteTag;
use serde_json::Value;
use std::sync::Arc;

type ValueReader = Arc<dyn Fn() -> Option<Value> + Send + Sync>;
type PatchWriter = Arc<dyn Fn(Vec<Patch>, Vec<WriteTag>) -> Result<()> + Send + Sync>;

/// Write façade for an optimistic writable signal.
#[derive(Clone)]
pub struct SignalSetter {
    read: ValueReader,
    write: PatchWriter,
}

impl SignalSetter {
    /// Build a setter from the two primitives.
    pub fn new(
        read: impl Fn() -> Option<Value> + Send + Sync + 'static,
        write: impl Fn(Vec<Patch>, Vec<WriteTag>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            read: Arc::new(read),
            write: Arc::new(write),
        }
    }

    /// Replace the whole value.
    pub fn set(&self, value: Value, tags: Vec<WriteTag>) -> Result<()> {
        (self.write)(vec![Patch::replace_root(value)], tags)
    }

    /// Derive the next value from the current one.
    pub fn with_updater(
        &self,
        update: impl FnOnce(Value) -> Value,
        tags: Vec<WriteTag>,
    ) -> Result<()> {
        let base = (self.read)().unwrap_or(Value::Null);
        let next = update(base.clone());
        let (_, patches) = produce_patches(&base, |draft| *draft = next);
        self.write_nonempty(patches, tags)
    }

    /// Mutate a draft of the current value in place; the edit is diffed into
    /// patches.
    pub fn with_producer(
        &self,
        produce: impl FnOnce(&mut Value),
        tags: Vec<WriteTag>,
    ) -> Result<()> {
        let base = (self.read)().unwrap_or(Value::Null);
        let (_, patches) = produce_patches(&base, produce);
        self.write_nonempty(patches, tags)
    }

    /// Apply a patch list directly.
    pub fn with_patches(&self, patches: Vec<Patch>, tags: Vec<WriteTag>) -> Result<()> {
        (self.write)(patches, tags)
    }

    /// An edit that changed nothing produces no write at all.
    fn write_nonempty(&self, patches: Vec<Patch>, tags: Vec<WriteTag>) -> Result<()> {
        if patches.is_empty() {
            return Ok(());
        }
        (self.write)(patches, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Vec<(Vec<Patch>, Vec<WriteTag>)>>>;

    fn recording_setter(current: Value) -> (SignalSetter, Recorded) {
        let writes: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = writes.clone();
        let setter = SignalSetter::new(
            move || Some(current.clone()),
            move |patches, tags| {
                sink.lock().unwrap().push((patches, tags));
                Ok(())
            },
        );
        (setter, writes)
    }

    #[test]
    fn test_set_is_a_root_replace() {
        let (setter, writes) = recording_setter(json!({"n": 0}));
        setter.set(json!({"n": 9}), vec!["ui".into()]).unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, vec![Patch::replace_root(json!({"n": 9}))]);
        assert_eq!(writes[0].1, vec![WriteTag::from("ui")]);
    }

    #[test]
    fn test_with_updater_diffs_against_current() {
        let (setter, writes) = recording_setter(json!({"n": 0, "keep": true}));
        setter
            .with_updater(
                |mut value| {
                    value["n"] = json!(1);
                    value
                },
                Vec::new(),
            )
            .unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].0, vec![Patch::replace(vec!["n".into()], json!(1))]);
    }

    #[test]
    fn test_with_producer_runs_against_a_draft() {
        let (setter, writes) = recording_setter(json!({"items": [1, 2]}));
        setter
            .with_producer(
                |draft| {
                    draft["flag"] = json!(true);
                },
                Vec::new(),
            )
            .unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].0, vec![Patch::add(vec!["flag".into()], json!(true))]);
    }

    #[test]
    fn test_with_patches_passes_through() {
        let (setter, writes) = recording_setter(json!({}));
        let patches = vec![Patch::add(vec!["x".into()], json!(1))];
        setter.with_patches(patches.clone(), vec![7.into()]).unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].0, patches);
        assert_eq!(writes[0].1, vec![WriteTag::Number(7)]);
    }

    #[test]
    fn test_unchanged_edit_writes_nothing() {
        let (setter, writes) = recording_setter(json!({"n": 0}));
        setter.with_producer(|_| {}, Vec::new()).unwrap();
        setter.with_updater(|value| value, Vec::new()).unwrap();
        assert!(writes.lock().unwrap().is_empty());
    }
}
