//! Per-campaign ordered event fan-out with a bounded replay buffer.
//!
//! Each topic owns a mutex-guarded sequence counter and buffer next to its
//! broadcast sender, so the order events are published in is exactly the
//! order of their sequence numbers on every receiver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use recondor_model::{CampaignEvent, CampaignId, EventPayload};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_REPLAY_CAPACITY: usize = 256;
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct TopicState {
    next_sequence: u64,
    replay: VecDeque<CampaignEvent>,
}

struct Topic {
    state: Mutex<TopicState>,
    sender: broadcast::Sender<CampaignEvent>,
}

/// Handed to a subscriber: buffered catch-up events followed by the live
/// receiver. When `resync_required` is set the requested position fell out of
/// the buffer and the client must refetch a snapshot before resuming.
pub struct Subscription {
    pub replay: Vec<CampaignEvent>,
    pub live: broadcast::Receiver<CampaignEvent>,
    pub resync_required: bool,
}

pub struct EventBroadcaster {
    topics: DashMap<CampaignId, Arc<Topic>>,
    replay_capacity: usize,
    channel_capacity: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY, DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(replay_capacity: usize, channel_capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            replay_capacity: replay_capacity.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    fn topic(&self, campaign_id: CampaignId) -> Arc<Topic> {
        self.topics
            .entry(campaign_id)
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.channel_capacity);
                Arc::new(Topic {
                    state: Mutex::new(TopicState {
                        next_sequence: 1,
                        replay: VecDeque::with_capacity(self.replay_capacity),
                    }),
                    sender,
                })
            })
            .clone()
    }

    /// Assign the next sequence number, buffer the event and fan it out.
    pub fn publish(&self, campaign_id: CampaignId, payload: EventPayload) -> CampaignEvent {
        let topic = self.topic(campaign_id);
        let mut state = topic
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let event = CampaignEvent::new(campaign_id, sequence, payload);
        if state.replay.len() == self.replay_capacity {
            state.replay.pop_front();
        }
        state.replay.push_back(event.clone());

        // No receivers is fine; the replay buffer covers late subscribers.
        let _ = topic.sender.send(event.clone());
        drop(state);

        debug!(
            campaign = %campaign_id,
            seq = sequence,
            kind = event.payload.wire_type(),
            "event published"
        );
        event
    }

    /// Subscribe, optionally resuming after a previously seen sequence. The
    /// receiver is taken under the topic lock so no event can fall between
    /// the replayed batch and the live stream.
    pub fn subscribe(&self, campaign_id: CampaignId, after_sequence: Option<u64>) -> Subscription {
        let topic = self.topic(campaign_id);
        let state = topic
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let live = topic.sender.subscribe();

        let Some(after) = after_sequence else {
            return Subscription {
                replay: Vec::new(),
                live,
                resync_required: false,
            };
        };

        let oldest_buffered = state.next_sequence - state.replay.len() as u64;
        if after + 1 < oldest_buffered {
            return Subscription {
                replay: Vec::new(),
                live,
                resync_required: true,
            };
        }

        let replay = state
            .replay
            .iter()
            .filter(|event| event.sequence_number > after)
            .cloned()
            .collect();

        Subscription {
            replay,
            live,
            resync_required: false,
        }
    }

    /// First sequence still held in the replay buffer, if any.
    pub fn oldest_buffered_sequence(&self, campaign_id: CampaignId) -> Option<u64> {
        let topic = self.topics.get(&campaign_id)?;
        let state = topic
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.replay.front().map(|event| event.sequence_number)
    }

    /// Drop a finished campaign's topic and its buffer.
    pub fn remove_topic(&self, campaign_id: CampaignId) {
        self.topics.remove(&campaign_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(percent: f64) -> EventPayload {
        EventPayload::Progress(recondor_model::ProgressSnapshot {
            total_items: 100,
            processed_items: percent as i64,
            successful_items: percent as i64,
            failed_items: 0,
            progress_percent: percent,
            status: "running".into(),
        })
    }

    #[tokio::test]
    async fn sequences_are_contiguous_per_campaign() {
        let broadcaster = EventBroadcaster::default();
        let campaign = CampaignId::new();
        let other = CampaignId::new();

        for expected in 1..=5 {
            let event = broadcaster.publish(campaign, progress(expected as f64));
            assert_eq!(event.sequence_number, expected);
        }
        // Independent counter per topic.
        assert_eq!(broadcaster.publish(other, progress(1.0)).sequence_number, 1);
    }

    #[tokio::test]
    async fn resubscribe_replays_missed_events_then_continues_live() {
        let broadcaster = EventBroadcaster::default();
        let campaign = CampaignId::new();

        for i in 1..=4 {
            broadcaster.publish(campaign, progress(i as f64));
        }

        let mut sub = broadcaster.subscribe(campaign, Some(2));
        assert!(!sub.resync_required);
        let replayed: Vec<u64> = sub.replay.iter().map(|e| e.sequence_number).collect();
        assert_eq!(replayed, vec![3, 4]);

        broadcaster.publish(campaign, progress(5.0));
        let live = sub.live.recv().await.unwrap();
        assert_eq!(live.sequence_number, 5);
    }

    #[tokio::test]
    async fn stale_resume_point_requires_resync() {
        let broadcaster = EventBroadcaster::new(4, 16);
        let campaign = CampaignId::new();

        for i in 1..=10 {
            broadcaster.publish(campaign, progress(i as f64));
        }

        // Buffer holds 7..=10; sequence 2 is long gone.
        let sub = broadcaster.subscribe(campaign, Some(2));
        assert!(sub.resync_required);
        assert!(sub.replay.is_empty());
        assert_eq!(broadcaster.oldest_buffered_sequence(campaign), Some(7));

        // Resuming from within the buffer still works.
        let sub = broadcaster.subscribe(campaign, Some(8));
        assert!(!sub.resync_required);
        let replayed: Vec<u64> = sub.replay.iter().map(|e| e.sequence_number).collect();
        assert_eq!(replayed, vec![9, 10]);
    }

    #[tokio::test]
    async fn fresh_subscription_gets_no_replay() {
        let broadcaster = EventBroadcaster::default();
        let campaign = CampaignId::new();
        broadcaster.publish(campaign, progress(1.0));

        let sub = broadcaster.subscribe(campaign, None);
        assert!(sub.replay.is_empty());
        assert!(!sub.resync_required);
    }
}
