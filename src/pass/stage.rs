//! Render Stage Definitions
//!
//! `RenderStage` defines the fixed stage ordering of a frame. Each stage may
//! contain multiple shader passes; passes within a stage execute in ordinal
//! order, and callbacks registered at a (stage, ordinal) slot execute when
//! that pass becomes active.

/// Render stage enumeration.
///
/// Defines the execution order of the frame. The scheduler visits stages
/// strictly in this order every frame; a stage with no registered passes is
/// passed through, not stalled.
///
/// # Stage Overview
///
/// | Stage | Purpose |
/// |-------|---------|
/// | `PreRender` | Uploads, compute pre-passes, shadow maps |
/// | `PrimaryRender` | Main scene content into the primary targets |
/// | `SecondaryRender` | Auxiliary content into the secondary targets |
/// | `PostRender` | Post-processing over rendered targets |
/// | `PreFrameSwap` | Work that must precede compositing |
/// | `PostFrameSwap` | Work after the frame is presented |
/// | `End` | Sentinel — never active, marks scheduler completion |
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[repr(u8)]
pub enum RenderStage {
    /// First stage of the frame: uploads, compute pre-passes, shadows.
    PreRender = 0,
    /// Main scene rendering into the primary targets.
    PrimaryRender = 1,
    /// Auxiliary rendering into the secondary targets.
    SecondaryRender = 2,
    /// Post-processing stage.
    PostRender = 3,
    /// Runs before the composited frame is presented.
    PreFrameSwap = 4,
    /// Runs after presentation (last live stage of the frame).
    PostFrameSwap = 5,
    /// Sentinel marking the end of the stage sequence.
    End = 6,
}

impl RenderStage {
    /// Returns the numeric index of the stage (used for sorting).
    #[inline]
    #[must_use]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// The stage after this one; `End` is its own successor.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::PreRender => Self::PrimaryRender,
            Self::PrimaryRender => Self::SecondaryRender,
            Self::SecondaryRender => Self::PostRender,
            Self::PostRender => Self::PreFrameSwap,
            Self::PreFrameSwap => Self::PostFrameSwap,
            Self::PostFrameSwap | Self::End => Self::End,
        }
    }

    /// Decode a description-file stage index.
    #[must_use]
    pub fn from_index(index: i64) -> Option<Self> {
        Some(match index {
            0 => Self::PreRender,
            1 => Self::PrimaryRender,
            2 => Self::SecondaryRender,
            3 => Self::PostRender,
            4 => Self::PreFrameSwap,
            5 => Self::PostFrameSwap,
            _ => return None,
        })
    }

    /// Stage name (for debugging).
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PreRender => "PreRender",
            Self::PrimaryRender => "PrimaryRender",
            Self::SecondaryRender => "SecondaryRender",
            Self::PostRender => "PostRender",
            Self::PreFrameSwap => "PreFrameSwap",
            Self::PostFrameSwap => "PostFrameSwap",
            Self::End => "End",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(RenderStage::PreRender < RenderStage::PrimaryRender);
        assert!(RenderStage::PrimaryRender < RenderStage::SecondaryRender);
        assert!(RenderStage::SecondaryRender < RenderStage::PostRender);
        assert!(RenderStage::PostRender < RenderStage::PreFrameSwap);
        assert!(RenderStage::PreFrameSwap < RenderStage::PostFrameSwap);
        assert!(RenderStage::PostFrameSwap < RenderStage::End);
    }

    #[test]
    fn test_stage_successors_terminate() {
        let mut stage = RenderStage::PreRender;
        for _ in 0..16 {
            stage = stage.next();
        }
        assert_eq!(stage, RenderStage::End);
        assert_eq!(RenderStage::End.next(), RenderStage::End);
    }

    #[test]
    fn test_index_round_trip() {
        for i in 0..6 {
            let stage = RenderStage::from_index(i).unwrap();
            assert_eq!(i64::from(stage.order()), i);
        }
        assert!(RenderStage::from_index(6).is_none());
        assert!(RenderStage::from_index(-1).is_none());
    }
}
