//! Render targets: the surfaces sessions write decoded frames into

use camview_shared::DisplayImage;
use parking_lot::Mutex;

/// A display surface owned by exactly one session at a time
pub trait RenderTarget: Send + Sync {
    /// Clear to the placeholder state; called when a session opens on it
    fn reset(&self);

    /// Replace the shown image with frame `sequence`
    fn present(&self, sequence: u64, image: &DisplayImage);

    /// The stream behind this surface is gone; the last image stays up
    fn mark_stale(&self, reason: &str);
}

/// Point-in-time view of a [`FrameSlot`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub current: Option<DisplayImage>,
    /// Sequence number of `current`, 0 when showing the placeholder
    pub sequence: u64,
    pub presented: u64,
    pub bytes_presented: u64,
    pub resets: u64,
    pub stale: Option<String>,
}

/// In-memory render target holding the latest frame
#[derive(Debug)]
pub struct FrameSlot {
    label: String,
    state: Mutex<SlotSnapshot>,
}

impl FrameSlot {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(SlotSnapshot::default()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        self.state.lock().clone()
    }
}

impl RenderTarget for FrameSlot {
    fn reset(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.sequence = 0;
        state.stale = None;
        state.resets += 1;
    }

    fn present(&self, sequence: u64, image: &DisplayImage) {
        let mut state = self.state.lock();
        state.current = Some(image.clone());
        state.sequence = sequence;
        state.presented += 1;
        state.bytes_presented += image.byte_len as u64;
    }

    fn mark_stale(&self, reason: &str) {
        self.state.lock().stale = Some(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camview_shared::codec::to_display_image;

    #[test]
    fn test_slot_lifecycle() {
        let slot = FrameSlot::new("video");
        assert_eq!(slot.label(), "video");

        slot.reset();
        let image = to_display_image(&[0xFF, 0xD8, 0xFF, 0x00]).expect("decode failed");
        slot.present(3, &image);
        slot.mark_stale("server went away");

        let snap = slot.snapshot();
        assert_eq!(snap.sequence, 3);
        assert_eq!(snap.presented, 1);
        assert_eq!(snap.bytes_presented, 4);
        assert_eq!(snap.current, Some(image));
        assert_eq!(snap.stale.as_deref(), Some("server went away"));

        slot.reset();
        let snap = slot.snapshot();
        assert!(snap.current.is_none());
        assert!(snap.stale.is_none());
        assert_eq!(snap.resets, 2);
        assert_eq!(snap.presented, 1);
    }
}
