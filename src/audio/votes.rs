use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info};

/// What a skip vote is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipTarget {
    /// Track id of the playing song
    Track(String),
    /// Playlist id of the playing song
    Playlist(String),
}

impl SkipTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Track(id) | Self::Playlist(id) => id,
        }
    }
}

/// Outcome of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub should_skip: bool,
    pub votes: usize,
    /// Votes needed for the threshold with the listener count of this vote
    pub required: usize,
}

#[derive(Debug)]
struct VoteRecord {
    target_id: String,
    voters: HashSet<String>,
    triggered: bool,
}

impl VoteRecord {
    fn new(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            voters: HashSet::new(),
            triggered: false,
        }
    }
}

#[derive(Debug, Default)]
struct Records {
    track: Option<VoteRecord>,
    playlist: Option<VoteRecord>,
}

impl Records {
    fn slot(&mut self, target: &SkipTarget) -> &mut Option<VoteRecord> {
        match target {
            SkipTarget::Track(_) => &mut self.track,
            SkipTarget::Playlist(_) => &mut self.playlist,
        }
    }
}

/// Skip votes for the playing track and the playing playlist.
///
/// Holds at most one record per kind. A vote for a different target than the
/// live record replaces it, so stale votes never carry over to a new song.
#[derive(Debug, Default)]
pub struct SkipVoteAggregator {
    records: Mutex<Records>,
}

impl SkipVoteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra el voto de `voter`.
    ///
    /// Repeated votes from the same voter are ignored. `should_skip` is true
    /// only for the vote that first reaches `votes / listeners >= ratio`.
    pub fn register_vote(
        &self,
        target: &SkipTarget,
        voter: &str,
        listener_count: usize,
        ratio: f32,
    ) -> VoteTally {
        let listeners = listener_count.max(1);
        let mut records = self.records.lock();
        let slot = records.slot(target);

        if slot.as_ref().map_or(true, |r| r.target_id != target.id()) {
            *slot = Some(VoteRecord::new(target.id()));
        }
        let record = slot.get_or_insert_with(|| VoteRecord::new(target.id()));

        if !record.voters.insert(voter.to_string()) {
            debug!("🗳️ Voto repetido de {} ignorado", voter);
        }

        let votes = record.voters.len();
        let reached = votes as f32 / listeners as f32 >= ratio;
        let should_skip = reached && !record.triggered;
        if should_skip {
            record.triggered = true;
            info!("⏭️ Umbral de votos alcanzado para {} ({}/{})", target.id(), votes, listeners);
        }

        VoteTally {
            should_skip,
            votes,
            required: required_votes(listeners, ratio),
        }
    }

    /// Skip forzado por un admin: no toca los votos.
    pub fn admin_skip(&self, target: &SkipTarget) -> VoteTally {
        let votes = {
            let mut records = self.records.lock();
            records
                .slot(target)
                .as_ref()
                .filter(|r| r.target_id == target.id())
                .map_or(0, |r| r.voters.len())
        };
        info!("⏭️ Skip forzado por admin para {}", target.id());
        VoteTally {
            should_skip: true,
            votes,
            required: 0,
        }
    }

    pub fn reset(&self, target: &SkipTarget) {
        *self.records.lock().slot(target) = None;
    }

    pub fn reset_track(&self) {
        self.records.lock().track = None;
    }

    pub fn reset_playlist(&self) {
        self.records.lock().playlist = None;
    }

    pub fn votes(&self, target: &SkipTarget) -> usize {
        let mut records = self.records.lock();
        records
            .slot(target)
            .as_ref()
            .filter(|r| r.target_id == target.id())
            .map_or(0, |r| r.voters.len())
    }
}

fn required_votes(listeners: usize, ratio: f32) -> usize {
    ((listeners as f32 * ratio).ceil() as usize).max(1)
}
