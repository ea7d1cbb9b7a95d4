//! Notification store (spec 4.7): transient notices with optional
//! auto-dismiss timers that can be paused and resumed mid-flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use super::now_ms;
use crate::events::{EventBus, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub label: String,
    pub action_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub created_at: u64,
    pub duration_ms: Option<u64>,
    pub actions: Vec<NotificationAction>,
    pub dismissed: bool,
}

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Added(Notification),
    Dismissed { id: u64 },
    Removed { id: u64 },
    ActionInvoked { id: u64, action_id: String },
}

/// Per-notification auto-dismiss bookkeeping. `remaining_at_pause` holds
/// the time left when paused; `None` means the timer is currently running
/// (or the notification has no timer at all).
struct TimerState {
    handle: Option<AbortHandle>,
    remaining_ms: Option<u64>,
    paused: bool,
}

struct State {
    notifications: HashMap<u64, Notification>,
    order: Vec<u64>,
    timers: HashMap<u64, TimerState>,
    next_id: u64,
}

pub struct NotificationStore {
    state: Mutex<State>,
    events: Arc<EventBus<NotificationEvent>>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                notifications: HashMap::new(),
                order: Vec::new(),
                timers: HashMap::new(),
                next_id: 1,
            }),
            events: Arc::new(EventBus::new()),
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<Notification> {
        let s = self.state.lock();
        s.order.iter().filter_map(|id| s.notifications.get(id).cloned()).collect()
    }

    /// Adds a notification and, if `duration_ms` is set, schedules an
    /// auto-dismiss task on the provided runtime handle.
    pub fn push(
        self: &Arc<Self>,
        kind: NotificationType,
        title: String,
        message: String,
        duration_ms: Option<u64>,
        actions: Vec<NotificationAction>,
    ) -> u64 {
        let notification = {
            let mut s = self.state.lock();
            let id = s.next_id;
            s.next_id += 1;
            let notification = Notification {
                id,
                kind,
                title,
                message,
                created_at: now_ms(),
                duration_ms,
                actions,
                dismissed: false,
            };
            s.notifications.insert(id, notification.clone());
            s.order.push(id);
            s.timers.insert(
                id,
                TimerState {
                    handle: None,
                    remaining_ms: duration_ms,
                    paused: false,
                },
            );
            notification
        };

        if let Some(duration_ms) = duration_ms {
            self.schedule_dismiss(notification.id, duration_ms);
        }
        self.events.emit(&NotificationEvent::Added(notification.clone()));
        notification.id
    }

    fn schedule_dismiss(self: &Arc<Self>, id: u64, delay_ms: u64) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            this.dismiss(id);
        });
        let mut s = self.state.lock();
        if let Some(timer) = s.timers.get_mut(&id) {
            timer.handle = Some(task.abort_handle());
        }
    }

    /// Marks a notification dismissed and cancels any pending timer.
    pub fn dismiss(&self, id: u64) {
        let already = {
            let mut s = self.state.lock();
            let Some(notification) = s.notifications.get_mut(&id) else {
                return;
            };
            if notification.dismissed {
                true
            } else {
                notification.dismissed = true;
                if let Some(timer) = s.timers.get_mut(&id) {
                    if let Some(handle) = timer.handle.take() {
                        handle.abort();
                    }
                }
                false
            }
        };
        if !already {
            self.events.emit(&NotificationEvent::Dismissed { id });
        }
    }

    /// Removes a notification entirely, idempotently.
    pub fn remove(&self, id: u64) {
        let removed = {
            let mut s = self.state.lock();
            if let Some(timer) = s.timers.remove(&id) {
                if let Some(handle) = timer.handle {
                    handle.abort();
                }
            }
            s.order.retain(|existing| *existing != id);
            s.notifications.remove(&id).is_some()
        };
        if removed {
            self.events.emit(&NotificationEvent::Removed { id });
        }
    }

    /// Freezes the remaining auto-dismiss time without cancelling it
    /// permanently; resumption recomputes from `created_at`/`duration_ms`.
    pub fn pause(&self, id: u64) {
        let mut s = self.state.lock();
        let Some(notification) = s.notifications.get(&id).cloned() else {
            return;
        };
        let Some(duration_ms) = notification.duration_ms else {
            return;
        };
        let Some(timer) = s.timers.get_mut(&id) else {
            return;
        };
        if timer.paused {
            return;
        }
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        let elapsed = now_ms().saturating_sub(notification.created_at);
        timer.remaining_ms = Some(duration_ms.saturating_sub(elapsed));
        timer.paused = true;
    }

    /// Resumes a paused timer. The remaining delay is
    /// `max(duration - (now - created_at), 1000ms)` per the spec's exact
    /// recompute formula, floored so a notification never vanishes
    /// instantly on resume.
    pub fn resume(self: &Arc<Self>, id: u64) {
        let remaining = {
            let mut s = self.state.lock();
            let Some(notification) = s.notifications.get(&id).cloned() else {
                return;
            };
            let Some(duration_ms) = notification.duration_ms else {
                return;
            };
            let Some(timer) = s.timers.get_mut(&id) else {
                return;
            };
            if !timer.paused {
                return;
            }
            timer.paused = false;
            let elapsed = now_ms().saturating_sub(notification.created_at);
            let remaining = duration_ms.saturating_sub(elapsed).max(1000);
            timer.remaining_ms = Some(remaining);
            remaining
        };
        self.schedule_dismiss(id, remaining);
    }

    pub fn invoke_action(&self, id: u64, action_id: String) {
        let exists = self.state.lock().notifications.contains_key(&id);
        if exists {
            self.events.emit(&NotificationEvent::ActionInvoked { id, action_id });
        }
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&NotificationEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<NotificationEvent> {
        self.events.subscribe(handler)
    }
}
