//! # participant
//!
//! why: vote on transactions and apply the coordinator's outcome exactly once
//! relations: persists twopc-core records through twopc-storage, asks callback.rs for votes
//! what: Participant (START timer, PREPARE, DECISION, inquiry loop, recover)
//!
//! A yes vote is written to the log before it is sent. From then on the
//! record is uncertain and only a DECISION or a terminal INQUIRE_REPLY can
//! move it.

use crate::callback::DecisionCallback;
use crate::config::ParticipantConfig;
use crate::error::Result;
use crate::recovery::Recovery;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use twopc_core::{
    Decision, DecisionEffect, LogRecord, Message, NodeId, ParticipantRecord, ParticipantState,
    TransactionId, Vote,
};
use twopc_storage::TransactionLog;

type Slot = Arc<AsyncMutex<ParticipantRecord>>;

/// The participant role of a node
pub struct Participant<L, T> {
    id: NodeId,
    coordinator: NodeId,
    log: Arc<L>,
    transport: Arc<T>,
    callback: Arc<dyn DecisionCallback>,
    config: ParticipantConfig,
    transactions: Mutex<HashMap<TransactionId, Slot>>,
}

impl<L, T> Participant<L, T>
where
    L: TransactionLog + 'static,
    T: Transport + 'static,
{
    pub fn new(
        id: NodeId,
        coordinator: NodeId,
        log: Arc<L>,
        transport: Arc<T>,
        callback: Arc<dyn DecisionCallback>,
        config: ParticipantConfig,
    ) -> Self {
        Self {
            id,
            coordinator,
            log,
            transport,
            callback,
            config,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// slot for `id`: live, or loaded from the log, or a fresh Init record
    ///
    /// terminal records are not cached; the log answers for them.
    fn slot(&self, id: &TransactionId) -> Result<Slot> {
        if let Some(slot) = self.transactions.lock().get(id) {
            return Ok(Arc::clone(slot));
        }
        let record = match self.log.read(id)? {
            Some(LogRecord::Participant(record)) => record,
            Some(LogRecord::Coordinator(_)) => {
                warn!(txid = %id, "coordinator record in participant log ignored");
                ParticipantRecord::new(id.clone())
            }
            None => ParticipantRecord::new(id.clone()),
        };
        if record.state.is_terminal() {
            return Ok(Arc::new(AsyncMutex::new(record)));
        }
        let mut txns = self.transactions.lock();
        let slot = txns
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(record)));
        Ok(Arc::clone(slot))
    }

    /// forget a transaction once its outcome is archived
    fn evict(&self, id: &TransactionId) {
        self.transactions.lock().remove(id);
    }

    /// number of transactions currently held in memory
    pub fn live_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    /// current view of a transaction, without creating one
    pub async fn record(&self, id: &TransactionId) -> Result<Option<ParticipantRecord>> {
        let live = self.transactions.lock().get(id).cloned();
        if let Some(slot) = live {
            return Ok(Some(slot.lock().await.clone()));
        }
        Ok(self.log.read(id)?.and_then(|r| r.as_participant().cloned()))
    }

    pub async fn state(&self, id: &TransactionId) -> Result<Option<ParticipantState>> {
        Ok(self.record(id).await?.map(|r| r.state))
    }

    /// START: the transaction exists; PREPARE must now arrive within
    /// `prepare_timeout` or this participant aborts on its own.
    pub async fn handle_start(self: &Arc<Self>, id: &TransactionId) -> Result<()> {
        let slot = self.slot(id)?;
        {
            let record = slot.lock().await;
            if record.state != ParticipantState::Init || self.log.read(id)?.is_some() {
                debug!(txid = %id, "START for a transaction already known");
                return Ok(());
            }
            self.log.write(&record.clone().into())?;
        }
        debug!(txid = %id, timeout_ms = self.config.prepare_timeout_ms, "waiting for PREPARE");
        self.arm_prepare_timer(id);
        Ok(())
    }

    fn arm_prepare_timer(self: &Arc<Self>, id: &TransactionId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            sleep(this.config.prepare_timeout()).await;
            if let Err(e) = this.expire_prepare_wait(&id).await {
                error!(txid = %id, error = %e, "unilateral abort not persisted");
            }
        })
    }

    async fn expire_prepare_wait(&self, id: &TransactionId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.lock().await;
        if record.state != ParticipantState::Init {
            return Ok(());
        }
        let mut next = record.clone();
        next.abort_unilaterally()?;
        self.log.write(&next.clone().into())?;
        self.log.archive(id)?;
        *record = next;
        self.evict(id);
        warn!(txid = %id, "no PREPARE before timeout; aborted unilaterally");
        Ok(())
    }

    /// PREPARE: answer from durable state if already voted, otherwise ask
    /// the callback. A yes vote is persisted before it is returned.
    pub async fn handle_prepare(self: &Arc<Self>, id: &TransactionId) -> Result<Vote> {
        let slot = self.slot(id)?;
        let mut record = slot.lock().await;
        if let Some(vote) = record.prepare_reply() {
            debug!(txid = %id, %vote, state = ?record.state, "repeated PREPARE answered from log");
            return Ok(vote);
        }

        // may block for as long as the application wants; only this id waits
        let vote = self.callback.vote(id).await;

        let mut next = record.clone();
        match vote {
            Vote::Yes => next.vote_yes()?,
            Vote::No => next.vote_no()?,
        }
        if let Err(e) = self.log.write(&next.clone().into()) {
            error!(txid = %id, %vote, error = %e, "vote not persisted; withholding it");
            return Err(e.into());
        }
        if vote == Vote::No {
            self.log.archive(id)?;
            self.evict(id);
        }
        *record = next;
        drop(record);

        info!(txid = %id, %vote, "voted");
        if vote == Vote::Yes {
            self.watch_for_decision(id);
        }
        Ok(vote)
    }

    /// if the decision is late, start asking for it
    fn watch_for_decision(self: &Arc<Self>, id: &TransactionId) {
        let this = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            sleep(this.config.decision_timeout()).await;
            let uncertain = matches!(this.state(&id).await, Ok(Some(ParticipantState::Uncertain)));
            if uncertain {
                info!(txid = %id, "no DECISION yet; inquiring");
                this.inquire_until_resolved(&id).await;
            }
        });
    }

    /// DECISION: persist and apply it. Repeats of an applied decision
    /// change nothing; the caller acknowledges either way.
    pub async fn handle_decision(&self, id: &TransactionId, decision: Decision) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.lock().await;

        let mut next = record.clone();
        let effect = match next.apply_decision(decision) {
            Ok(effect) => effect,
            Err(e) => {
                // a refused DECISION for an id never seen leaves nothing behind
                if record.state == ParticipantState::Init && self.log.read(id)?.is_none() {
                    self.evict(id);
                }
                return Err(e.into());
            }
        };
        match effect {
            DecisionEffect::AlreadyApplied => {
                debug!(txid = %id, %decision, "decision already applied");
            }
            DecisionEffect::Applied => {
                self.log.write(&next.clone().into())?;
                self.log.archive(id)?;
                *record = next;
                self.evict(id);
                info!(txid = %id, %decision, "decision applied");
            }
        }
        Ok(())
    }

    /// Ask the coordinator for the outcome until it gives one or the
    /// attempt budget runs out. Returns whether the transaction is resolved.
    pub async fn inquire_until_resolved(&self, id: &TransactionId) -> bool {
        let mut attempts = 0u32;
        loop {
            // a DECISION may have arrived in the meantime
            match self.state(id).await {
                Ok(Some(ParticipantState::Uncertain)) => {}
                Ok(_) => return true,
                Err(e) => warn!(txid = %id, error = %e, "cannot read state before inquiry"),
            }

            attempts += 1;
            let inquire = Message::Inquire { id: id.clone() };
            let reply = timeout(
                self.config.inquiry_timeout(),
                self.transport.send(&self.coordinator, inquire),
            )
            .await;

            match reply {
                Ok(Ok(Some(Message::InquireReply { id: asked, answer }))) if &asked == id => {
                    match answer.decision() {
                        Some(decision) => match self.handle_decision(id, decision).await {
                            Ok(()) => {
                                info!(txid = %id, %decision, attempts, "resolved by inquiry");
                                self.acknowledge_resolution(id).await;
                                return true;
                            }
                            Err(e) => error!(txid = %id, error = %e, "inquiry answer not applied"),
                        },
                        None => debug!(txid = %id, attempts, "coordinator has no outcome yet"),
                    }
                }
                Ok(Ok(Some(other))) => warn!(txid = %id, reply = %other, "unexpected reply to INQUIRE"),
                Ok(Ok(None)) => debug!(txid = %id, "INQUIRE got no reply"),
                Ok(Err(e)) => debug!(txid = %id, error = %e, "INQUIRE not delivered"),
                Err(_) => debug!(txid = %id, "timed out waiting for INQUIRE_REPLY"),
            }

            if let Some(max) = self.config.inquiry_max_attempts {
                if attempts >= max {
                    warn!(txid = %id, attempts, "inquiry attempts exhausted; transaction stays uncertain");
                    return false;
                }
            }
            sleep(self.config.inquiry_interval()).await;
        }
    }

    /// tell the coordinator we are done so it stops resending DECISION
    async fn acknowledge_resolution(&self, id: &TransactionId) {
        let ack = Message::Ack {
            id: id.clone(),
            participant: self.id.clone(),
        };
        if let Err(e) = self.transport.send(&self.coordinator, ack).await {
            debug!(txid = %id, error = %e, "ACK after inquiry not delivered; coordinator will resend DECISION");
        }
    }

    /// Reload unfinished transactions from the log: uncertain ones start
    /// inquiring, ones still waiting for PREPARE get their timer back.
    pub async fn recover(self: &Arc<Self>) -> Result<Recovery> {
        let mut resumed = Vec::new();
        let mut tasks = Vec::new();

        for entry in self.log.read_all()? {
            let record = match entry {
                LogRecord::Participant(record) => record,
                LogRecord::Coordinator(stray) => {
                    warn!(txid = %stray.id, "coordinator record in participant log skipped");
                    continue;
                }
            };
            let id = record.id.clone();
            let state = record.state;
            if state.is_terminal() {
                // applied but not yet archived when the node went down
                self.log.archive(&id)?;
                continue;
            }
            {
                let mut txns = self.transactions.lock();
                if txns.contains_key(&id) {
                    debug!(txid = %id, "already live, not recovering");
                    continue;
                }
                txns.insert(id.clone(), Arc::new(AsyncMutex::new(record)));
            }

            match state {
                ParticipantState::Uncertain => {
                    let this = Arc::clone(self);
                    let task_id = id.clone();
                    tasks.push(tokio::spawn(async move {
                        this.inquire_until_resolved(&task_id).await;
                    }));
                }
                // still waiting for PREPARE
                _ => tasks.push(self.arm_prepare_timer(&id)),
            }
            resumed.push(id);
        }

        info!(node = %self.id, count = resumed.len(), "participant recovery scheduled");
        Ok(Recovery::new(resumed, tasks))
    }

    /// Inbound dispatch for the participant role.
    pub async fn handle_message(self: &Arc<Self>, message: Message) -> Option<Message> {
        match message {
            Message::Start { id } => {
                if let Err(e) = self.handle_start(&id).await {
                    error!(txid = %id, error = %e, "START not recorded");
                }
                None
            }
            Message::Prepare { id } => match self.handle_prepare(&id).await {
                Ok(vote) => Some(Message::Vote {
                    id,
                    participant: self.id.clone(),
                    vote,
                }),
                Err(e) => {
                    error!(txid = %id, error = %e, "PREPARE failed; no vote sent");
                    None
                }
            },
            Message::Decision { id, decision } => match self.handle_decision(&id, decision).await {
                Ok(()) => Some(Message::Ack {
                    id,
                    participant: self.id.clone(),
                }),
                Err(e) => {
                    error!(txid = %id, %decision, error = %e, "DECISION not applied; no ACK sent");
                    None
                }
            },
            other => {
                warn!(verb = other.verb(), txid = %other.transaction_id(), "message not handled by participant");
                None
            }
        }
    }
}
