// SPDX-License-Identifier: MIT

//! Job-status streams: one per job, plus the all-jobs singleton.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lp_core::{SharedJob, User};
use lp_wire::Response;
use parking_lot::Mutex;

use crate::channel::ResponseSender;
use crate::notifier::{JobStatusNotifier, Subscription};
use crate::repository::JobRepository;

use super::multi::SequenceTracker;

struct SingleState {
    tracker: SequenceTracker,
    initialized: bool,
    _subscription: Option<Subscription>,
}

/// Status stream for one job id, feeding any number of subscribed requests.
pub struct SingleJobStatusStream {
    job_id: String,
    repo: JobRepository,
    sender: ResponseSender,
    state: Mutex<SingleState>,
}

impl SingleJobStatusStream {
    pub fn new(job_id: &str, repo: JobRepository, sender: ResponseSender) -> Arc<Self> {
        Arc::new(Self {
            job_id: job_id.to_string(),
            repo,
            sender,
            state: Mutex::new(SingleState {
                tracker: SequenceTracker::default(),
                initialized: false,
                _subscription: None,
            }),
        })
    }

    /// Register a request. If the stream is already live, the newcomer gets
    /// the current state replayed immediately.
    pub fn add_request(&self, request_id: u64) {
        let mut state = self.state.lock();
        state.tracker.add_request(request_id);
        if state.initialized {
            self.send_current_state(&mut state, Some(request_id));
        }
    }

    /// Replay the current state to every registered request, then subscribe
    /// for updates.
    pub fn initialize(self: &Arc<Self>, notifier: &JobStatusNotifier) {
        let mut state = self.state.lock();
        self.send_current_state(&mut state, None);

        let weak = Arc::downgrade(self);
        let subscription = notifier.subscribe_job(&self.job_id, move |job| {
            if let Some(stream) = weak.upgrade() {
                stream.on_update(job);
            }
        });
        state._subscription = Some(subscription);
        state.initialized = true;
    }

    pub fn remove_request(&self, request_id: u64) {
        self.state.lock().tracker.remove_request(request_id);
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tracker.is_empty()
    }

    fn on_update(&self, job: &SharedJob) {
        let mut state = self.state.lock();
        let guard = job.lock();
        if guard.id != self.job_id {
            return;
        }
        let sequences = state.tracker.next_all();
        if !sequences.is_empty() {
            self.sender.send(Response::job_status(sequences, &guard));
        }
    }

    fn send_current_state(&self, state: &mut SingleState, only: Option<u64>) {
        let Some(job) = self.repo.get_job(&self.job_id, &User::all_users()) else {
            return;
        };
        let guard = job.lock();
        let sequences = match only {
            Some(request_id) => state.tracker.next_for(&BTreeSet::from([request_id])),
            None => state.tracker.next_all(),
        };
        if !sequences.is_empty() {
            self.sender.send(Response::job_status(sequences, &guard));
        }
    }
}

struct AllState {
    tracker: SequenceTracker,
    /// Requesting user per request id, for permission filtering.
    users: BTreeMap<u64, User>,
    initialized: bool,
    _subscription: Option<Subscription>,
}

/// The all-jobs status stream singleton.
pub struct AllJobStatusStream {
    repo: JobRepository,
    sender: ResponseSender,
    state: Mutex<AllState>,
}

impl AllJobStatusStream {
    pub fn new(repo: JobRepository, sender: ResponseSender) -> Arc<Self> {
        Arc::new(Self {
            repo,
            sender,
            state: Mutex::new(AllState {
                tracker: SequenceTracker::default(),
                users: BTreeMap::new(),
                initialized: false,
                _subscription: None,
            }),
        })
    }

    pub fn add_request(&self, request_id: u64, user: &User) {
        let mut state = self.state.lock();
        state.users.entry(request_id).or_insert_with(|| user.clone());
        state.tracker.add_request(request_id);
        if state.initialized {
            self.send_initial_states(&mut state, Some(request_id));
        }
    }

    pub fn initialize(self: &Arc<Self>, notifier: &JobStatusNotifier) {
        let mut state = self.state.lock();
        self.send_initial_states(&mut state, None);

        let weak = Arc::downgrade(self);
        let subscription = notifier.subscribe_all(move |job| {
            if let Some(stream) = weak.upgrade() {
                stream.on_update(job);
            }
        });
        state._subscription = Some(subscription);
        state.initialized = true;
    }

    pub fn remove_request(&self, request_id: u64) {
        let mut state = self.state.lock();
        state.users.remove(&request_id);
        state.tracker.remove_request(request_id);
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tracker.is_empty()
    }

    fn on_update(&self, job: &SharedJob) {
        let mut state = self.state.lock();
        let guard = job.lock();
        let visible = Self::request_ids_for(&state.users, &guard.user);
        let sequences = state.tracker.next_for(&visible);
        // An update visible to nobody emits nothing.
        if !sequences.is_empty() {
            self.sender.send(Response::job_status(sequences, &guard));
        }
    }

    /// The request ids whose user may see a job owned by `owner`.
    fn request_ids_for(users: &BTreeMap<u64, User>, owner: &User) -> BTreeSet<u64> {
        users
            .iter()
            .filter(|(_, user)| user.can_see(owner))
            .map(|(&request_id, _)| request_id)
            .collect()
    }

    /// Replay one response per visible job: to a single newcomer, or to
    /// every registered request at first initialization.
    fn send_initial_states(&self, state: &mut AllState, only: Option<u64>) {
        match only {
            Some(request_id) => {
                let Some(user) = state.users.get(&request_id).cloned() else {
                    return;
                };
                for job in self.repo.get_jobs(&user) {
                    let guard = job.lock();
                    let sequences = state.tracker.next_for(&BTreeSet::from([request_id]));
                    if !sequences.is_empty() {
                        self.sender.send(Response::job_status(sequences, &guard));
                    }
                }
            }
            None => {
                for job in self.repo.get_jobs(&User::all_users()) {
                    let guard = job.lock();
                    let visible = Self::request_ids_for(&state.users, &guard.user);
                    let sequences = state.tracker.next_for(&visible);
                    if !sequences.is_empty() {
                        self.sender.send(Response::job_status(sequences, &guard));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
