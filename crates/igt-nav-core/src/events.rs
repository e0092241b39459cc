//! Change notification for scene nodes.
//!
//! Observers subscribe to a set of nodes and receive one [`NodeEvent`] per
//! mutation of a watched node through a channel. Events are drained on the
//! observer's own schedule; nothing runs inside the mutating call.
//!
//! Tracker observers use a [`PoseSubscription`] instead: the watched pose is
//! evaluated while the mutation is delivered, so each queued [`PoseSample`]
//! holds the pose of its own frame even when several frames arrive between
//! drains.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::{NodeId, SceneError};

/// Notification delivered to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// Node content changed (matrix, parent, points, mesh or display).
    Modified(NodeId),
    /// Node was removed from the scene.
    Removed(NodeId),
}

impl NodeEvent {
    #[inline]
    pub fn node(&self) -> NodeId {
        match *self {
            NodeEvent::Modified(id) | NodeEvent::Removed(id) => id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// Receiving end of a node subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: Receiver<NodeEvent>,
}

impl Subscription {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next pending event, if any.
    pub fn try_next(&self) -> Option<NodeEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take every pending event.
    pub fn drain(&self) -> Vec<NodeEvent> {
        self.rx.try_iter().collect()
    }
}

/// Pose observed by a [`PoseSubscription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseWatch {
    /// Matrix of the node to its parent. Fires on changes of the node only.
    Local(NodeId),
    /// Matrix mapping `source` coordinates into `target`. Fires when a node
    /// of either transform chain changes; the chains are resolved at every
    /// mutation, so reparenting is followed.
    Relative { source: NodeId, target: NodeId },
}

impl PoseWatch {
    /// Nodes whose own removal or change always fires the watch.
    pub fn endpoints(&self) -> [NodeId; 2] {
        match *self {
            PoseWatch::Local(id) => [id, id],
            PoseWatch::Relative { source, target } => [source, target],
        }
    }
}

/// Pose right after the mutation that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSample {
    pub trigger: NodeEvent,
    /// `Err` when the pose could not be resolved at that moment.
    pub matrix: Result<Matrix4<f64>, SceneError>,
}

/// Receiving end of a pose subscription.
#[derive(Debug)]
pub struct PoseSubscription {
    id: SubscriptionId,
    watch: PoseWatch,
    rx: Receiver<PoseSample>,
}

impl PoseSubscription {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[inline]
    pub fn watch(&self) -> PoseWatch {
        self.watch
    }

    pub fn try_next(&self) -> Option<PoseSample> {
        self.rx.try_recv().ok()
    }

    pub fn drain(&self) -> Vec<PoseSample> {
        self.rx.try_iter().collect()
    }
}

struct Subscriber {
    id: SubscriptionId,
    nodes: BTreeSet<NodeId>,
    tx: Sender<NodeEvent>,
}

struct PoseWatcher {
    id: SubscriptionId,
    watch: PoseWatch,
    tx: Sender<PoseSample>,
}

/// Registry of live subscriptions, owned by the scene.
#[derive(Default)]
pub(crate) struct EventHub {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    pose_watchers: Vec<PoseWatcher>,
}

impl EventHub {
    fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn subscribe(&mut self, nodes: impl IntoIterator<Item = NodeId>) -> Subscription {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(Subscriber {
            id,
            nodes: nodes.into_iter().collect(),
            tx,
        });
        Subscription { id, rx }
    }

    pub(crate) fn subscribe_pose(&mut self, watch: PoseWatch) -> PoseSubscription {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel();
        self.pose_watchers.push(PoseWatcher { id, watch, tx });
        PoseSubscription { id, watch, rx }
    }

    /// Returns `true` if a subscription with this id was registered.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriber_count();
        self.subscribers.retain(|s| s.id != id);
        self.pose_watchers.retain(|w| w.id != id);
        self.subscriber_count() != before
    }

    pub(crate) fn notify(&mut self, event: NodeEvent) {
        let node = event.node();
        // a failed send means the receiver was dropped; forget that subscriber
        self.subscribers
            .retain(|s| !s.nodes.contains(&node) || s.tx.send(event).is_ok());
    }

    pub(crate) fn pose_watches(&self) -> impl Iterator<Item = (SubscriptionId, PoseWatch)> + '_ {
        self.pose_watchers.iter().map(|w| (w.id, w.watch))
    }

    pub(crate) fn send_poses(&mut self, samples: Vec<(SubscriptionId, PoseSample)>) {
        for (id, sample) in samples {
            let Some(pos) = self.pose_watchers.iter().position(|w| w.id == id) else {
                continue;
            };
            if self.pose_watchers[pos].tx.send(sample).is_err() {
                self.pose_watchers.swap_remove(pos);
            }
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len() + self.pose_watchers.len()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscribers.len())
            .field("pose_watchers", &self.pose_watchers.len())
            .finish()
    }
}
