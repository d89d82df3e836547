//! Readiness and stall signalling around the engine.

use crate::resource::ContentMetadata;

/// Externally visible lifecycle state.
///
/// `Stalled` is orthogonal to readiness: a player can only stall once it has
/// started, and leaving the stall returns to `Playable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Playable,
    Stalled,
    Disposed,
}

/// Decides when ready-to-play and playback-stalled notifications fire.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    prebuffer_bytes: u64,
    playable: bool,
    stalled: bool,
    disposed: bool,
}

impl LifecycleController {
    pub fn new(prebuffer_bytes: u64) -> Self {
        Self {
            prebuffer_bytes,
            playable: false,
            stalled: false,
            disposed: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        if self.disposed {
            LifecycleState::Disposed
        } else if self.stalled {
            LifecycleState::Stalled
        } else if self.playable {
            LifecycleState::Playable
        } else {
            LifecycleState::Created
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Readable bytes needed before playback may begin.
    ///
    /// A resource shorter than the prebuffer only needs to be complete.
    pub fn prebuffer_target(&self, metadata: &ContentMetadata) -> u64 {
        metadata
            .content_length
            .map_or(self.prebuffer_bytes, |len| len.min(self.prebuffer_bytes))
    }

    /// Updates state after a sweep.
    ///
    /// Returns true exactly once: when the engine first becomes playable.
    /// A sweep that delivered data ends any stall.
    pub fn observe_sweep(
        &mut self,
        metadata: Option<&ContentMetadata>,
        readable_bytes: u64,
        transfer_finished: bool,
        delivered_data: bool,
    ) -> bool {
        if self.disposed {
            return false;
        }

        if delivered_data {
            self.stalled = false;
        }

        if self.playable {
            return false;
        }

        let Some(metadata) = metadata else {
            return false;
        };

        if transfer_finished || readable_bytes >= self.prebuffer_target(metadata) {
            self.playable = true;
            return true;
        }

        false
    }

    /// Records a starvation report from the player.
    ///
    /// Returns true when this starts a new stall.
    pub fn report_stall(&mut self) -> bool {
        if self.disposed || self.stalled {
            return false;
        }
        self.stalled = true;
        true
    }

    /// Returns true the first time it is called.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        true
    }
}
