//! Per (host object, device) consistency tracking.
//!
//! The flags decide whether a transfer is needed before a kernel launch:
//! transfer host to device only when the device copy is not valid, transfer
//! device to host only when a kernel has modified the device copy since the
//! last host synchronization. The state holder performs no I/O of its own,
//! it is consulted and mutated by the device runtime.

use core::fmt::Display;

use crate::backend::BufferId;
use crate::Dim;

/// Caller-assigned stable identity of a host-visible object
pub type ObjectId = u64;

#[derive(Debug, Default)]
pub struct ObjectState {
    valid: bool,
    modified: bool,
    contents: bool,
    buffer: Option<BufferId>,
    bytes: Dim,
}

impl ObjectState {
    /// Fresh state, no buffer, no transfer has occurred
    #[must_use]
    pub const fn new() -> ObjectState {
        ObjectState { valid: false, modified: false, contents: false, buffer: None, bytes: 0 }
    }

    /// Attach a device buffer, replacing any previous attachment
    pub fn set_buffer(&mut self, buffer: BufferId, bytes: Dim) {
        self.buffer = Some(buffer);
        self.bytes = bytes;
    }

    #[must_use]
    pub const fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    #[must_use]
    pub const fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    #[must_use]
    pub const fn bytes(&self) -> Dim {
        self.bytes
    }

    /// Device copy is transfer-consistent with the host object
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Device copy has been written by a kernel since the last host sync
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Some transfer has occurred at least once
    #[must_use]
    pub const fn has_contents(&self) -> bool {
        self.contents
    }

    /// Host copy changed out of band, forces a re-upload before the next launch
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// A host to device write completed
    pub fn mark_transferred_to_device(&mut self) {
        self.valid = true;
        self.contents = true;
    }

    /// A device to host read completed
    pub fn mark_transferred_to_host(&mut self) {
        self.modified = false;
    }

    /// A kernel wrote the buffer, the device copy is ahead of the host
    pub fn mark_written_by_kernel(&mut self) {
        self.modified = true;
    }

    /// Buffer was released, detach and reset transfer knowledge
    pub(crate) fn clear_buffer(&mut self) {
        self.buffer = None;
        self.valid = false;
        self.modified = false;
        self.contents = false;
        self.bytes = 0;
    }
}

impl Display for ObjectState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(if self.valid { "V" } else { "-" })?;
        f.write_str(if self.modified { "M" } else { "-" })?;
        f.write_str(if self.contents { "C" } else { "-" })?;
        if let Some(buffer) = self.buffer {
            f.write_fmt(format_args!(" buffer={buffer:?}, size={}", human_bytes(self.bytes)))
        } else {
            f.write_str(" <unbuffered>")
        }
    }
}

/// Human readable byte count used in diagnostics
pub(crate) fn human_bytes(bytes: Dim) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024. && unit < UNITS.len() - 1 {
        value /= 1024.;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[test]
fn fresh_state_is_all_false() {
    let state = ObjectState::new();
    assert!(!state.is_valid());
    assert!(!state.is_modified());
    assert!(!state.has_contents());
    assert!(!state.has_buffer());
}

#[test]
fn state_transitions() {
    let mut state = ObjectState::new();
    state.set_buffer(BufferId(3), 4096);
    state.mark_transferred_to_device();
    assert!(state.is_valid());
    assert!(state.has_contents());
    assert!(!state.is_modified());

    state.mark_written_by_kernel();
    assert!(state.is_modified());
    assert!(state.is_valid());

    state.mark_transferred_to_host();
    assert!(!state.is_modified());
    assert!(state.is_valid());

    state.invalidate();
    assert!(!state.is_valid());
    assert!(state.has_contents());
}

#[test]
fn state_display() {
    let mut state = ObjectState::new();
    assert_eq!(format!("{state}"), "--- <unbuffered>");
    state.set_buffer(BufferId(0), 2048);
    state.mark_transferred_to_device();
    state.mark_written_by_kernel();
    assert_eq!(format!("{state}"), "VMC buffer=BufferId(0), size=2.0 KiB");
}
