use crate::narration::Cue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    Quarter,
    Half,
    ThreeQuarters,
    LastRep,
}

impl Milestone {
    pub fn cue(self) -> Cue {
        match self {
            Milestone::Quarter => Cue::Quarter,
            Milestone::Half => Cue::Halfway,
            Milestone::ThreeQuarters => Cue::AlmostDone,
            Milestone::LastRep => Cue::LastRep,
        }
    }
}

/// Repetition values at which encouragement cues fire for one target.
///
/// Fractional points use integer floor; a point that floors to zero is never
/// reached. The last-rep point is `target - 1`, but at least 1. Points may
/// coincide for small targets, in which case all of them fire together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestonePlan {
    points: [(Milestone, u32); 4],
}

impl MilestonePlan {
    pub fn for_target(target: u32) -> Self {
        Self {
            points: [
                (Milestone::Quarter, target / 4),
                (Milestone::Half, target / 2),
                (Milestone::ThreeQuarters, target * 3 / 4),
                (Milestone::LastRep, target.saturating_sub(1).max(1)),
            ],
        }
    }

    pub fn value(&self, milestone: Milestone) -> u32 {
        self.points
            .iter()
            .find(|(m, _)| *m == milestone)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// Milestones strictly above `from` and at or below `to`, in plan order.
    pub fn crossed(&self, from: u32, to: u32) -> impl Iterator<Item = Milestone> + '_ {
        self.points
            .iter()
            .filter(move |(_, v)| *v > from && *v <= to)
            .map(|(m, _)| *m)
    }
}
