//! # coordinator
//!
//! why: drive every participant of a transaction to the same outcome
//! relations: persists twopc-core records through twopc-storage, talks over transport.rs
//! what: Coordinator (start, prepare phase, decide, disseminate, recover, inquiry answers)
//!
//! Each transaction lives in its own slot guarded by an async mutex, so
//! everything touching one id is serialized while different ids proceed in
//! parallel. The decision is always written to the log before any DECISION
//! message derived from it leaves the node.

use crate::config::CoordinatorConfig;
use crate::error::{NodeError, Result};
use crate::fault::FaultInjector;
use crate::recovery::Recovery;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use twopc_core::{
    AckStatus, CoordinatorRecord, Decision, InquiryAnswer, LogRecord, Message, NodeId,
    ProtocolError, Tally, TransactionId, Vote,
};
use twopc_storage::TransactionLog;

/// How a transaction ended up, as seen by `Coordinator::execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub decision: Decision,
    /// every participant acknowledged; false if the retry budget ran out first
    pub complete: bool,
}

struct TxnSlot {
    record: AsyncMutex<CoordinatorRecord>,
    votes_changed: Notify,
}

impl TxnSlot {
    fn new(record: CoordinatorRecord) -> Arc<Self> {
        Arc::new(Self {
            record: AsyncMutex::new(record),
            votes_changed: Notify::new(),
        })
    }
}

/// The coordinator role of a node
pub struct Coordinator<L, T> {
    id: NodeId,
    log: Arc<L>,
    transport: Arc<T>,
    config: CoordinatorConfig,
    faults: Arc<FaultInjector>,
    transactions: Mutex<HashMap<TransactionId, Arc<TxnSlot>>>,
}

impl<L, T> Coordinator<L, T>
where
    L: TransactionLog + 'static,
    T: Transport + 'static,
{
    pub fn new(id: NodeId, log: Arc<L>, transport: Arc<T>, config: CoordinatorConfig) -> Self {
        Self {
            id,
            log,
            transport,
            config,
            faults: Arc::new(FaultInjector::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// share a fault injector with the test driving this coordinator
    pub fn with_fault_injector(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// slot for `id`, loading it from the log if this process has not seen it yet
    ///
    /// finished records are handed out without being cached; the log answers
    /// for them from then on.
    fn slot(&self, id: &TransactionId) -> Result<Arc<TxnSlot>> {
        if let Some(slot) = self.transactions.lock().get(id) {
            return Ok(Arc::clone(slot));
        }
        // no map lock held across log i/o
        match self.log.read(id)? {
            Some(LogRecord::Coordinator(record)) if record.is_complete() => Ok(TxnSlot::new(record)),
            Some(LogRecord::Coordinator(record)) => {
                let mut txns = self.transactions.lock();
                let slot = txns.entry(id.clone()).or_insert_with(|| TxnSlot::new(record));
                Ok(Arc::clone(slot))
            }
            _ => Err(NodeError::UnknownTransaction(id.clone())),
        }
    }

    /// forget a finished transaction; later messages reload it from the log
    fn evict(&self, id: &TransactionId) {
        self.transactions.lock().remove(id);
    }

    /// number of transactions currently held in memory
    pub fn live_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    /// current in-memory view of a transaction
    pub async fn record(&self, id: &TransactionId) -> Option<CoordinatorRecord> {
        let slot = self.slot(id).ok()?;
        let record = slot.record.lock().await.clone();
        Some(record)
    }

    /// Register a new transaction and persist it undecided.
    pub async fn start_transaction(
        &self,
        id: &TransactionId,
        participants: Vec<NodeId>,
    ) -> Result<()> {
        let live = self.transactions.lock().contains_key(id);
        if live || self.log.read(id)?.is_some() {
            return Err(NodeError::DuplicateTransaction(id.clone()));
        }

        // claim the id before the write so a concurrent start loses the race
        let record = CoordinatorRecord::new(id.clone(), participants);
        let slot = TxnSlot::new(record.clone());
        let claimed = slot.record.lock().await;
        match self.transactions.lock().entry(id.clone()) {
            Entry::Occupied(_) => return Err(NodeError::DuplicateTransaction(id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&slot));
            }
        }
        if let Err(e) = self.log.write(&record.clone().into()) {
            self.evict(id);
            return Err(e.into());
        }
        drop(claimed);
        info!(txid = %id, participants = record.participants.len(), "transaction started");

        if self.config.send_start_notice {
            self.send_start_notices(id, record.participant_ids()).await;
        }
        Ok(())
    }

    /// START goes to everyone at once; a peer that never answers costs at
    /// most one ack timeout
    async fn send_start_notices(&self, id: &TransactionId, participants: Vec<NodeId>) {
        let mut notices = JoinSet::new();
        for participant in participants {
            let transport = Arc::clone(&self.transport);
            let wait = self.config.ack_timeout();
            let notice = Message::Start { id: id.clone() };
            notices.spawn(async move {
                let sent = timeout(wait, transport.send(&participant, notice)).await;
                (participant, sent)
            });
        }

        while let Some(joined) = notices.join_next().await {
            match joined {
                Ok((_, Ok(Ok(_)))) => {}
                Ok((participant, Ok(Err(e)))) => {
                    debug!(txid = %id, participant = %participant, error = %e, "START notice not delivered")
                }
                Ok((participant, Err(_))) => {
                    debug!(txid = %id, participant = %participant, "START notice timed out")
                }
                Err(e) => warn!(txid = %id, error = %e, "START notice task failed"),
            }
        }
    }

    /// Phase one: solicit votes and work out the decision.
    ///
    /// Waits at most `vote_timeout` for the votes; a NO ends the wait early.
    /// Returns Commit only if every participant voted YES in time. Nothing is
    /// persisted here; pass the result to `decide`.
    pub async fn run_prepare_phase(self: &Arc<Self>, id: &TransactionId) -> Result<Decision> {
        let slot = self.slot(id)?;
        let participants = {
            let record = slot.record.lock().await;
            if let Some(decision) = record.decision {
                return Ok(decision);
            }
            record.participant_ids()
        };

        if self.faults.prepare_suppressed(id) {
            warn!(txid = %id, "PREPARE suppressed by fault injector");
        } else {
            for participant in participants {
                let this = Arc::clone(self);
                let id = id.clone();
                tokio::spawn(async move { this.solicit_vote(&id, &participant).await });
            }
        }

        match timeout(self.config.vote_timeout(), Self::await_votes(&slot)).await {
            Ok(decision) => {
                debug!(txid = %id, %decision, "votes tallied");
                Ok(decision)
            }
            Err(_) => {
                warn!(txid = %id, "timed out waiting for votes");
                Ok(Decision::Abort)
            }
        }
    }

    async fn await_votes(slot: &TxnSlot) -> Decision {
        loop {
            let changed = slot.votes_changed.notified();
            let tally = slot.record.lock().await.tally();
            match tally {
                Tally::Commit => return Decision::Commit,
                Tally::Abort => return Decision::Abort,
                Tally::Pending => changed.await,
            }
        }
    }

    async fn solicit_vote(&self, id: &TransactionId, participant: &NodeId) {
        let prepare = Message::Prepare { id: id.clone() };
        match self.transport.send(participant, prepare).await {
            Ok(Some(Message::Vote {
                id: voted,
                participant: from,
                vote,
            })) if &voted == id => self.handle_vote(&voted, &from, vote).await,
            Ok(Some(other)) => {
                warn!(txid = %id, participant = %participant, reply = %other, "unexpected reply to PREPARE")
            }
            Ok(None) => debug!(txid = %id, participant = %participant, "PREPARE got no vote back"),
            Err(e) => {
                warn!(txid = %id, participant = %participant, error = %e, "PREPARE not delivered; vote counts as absent")
            }
        }
    }

    /// Record a vote, whether it came back on the PREPARE exchange or on its own.
    pub async fn handle_vote(&self, id: &TransactionId, participant: &NodeId, vote: Vote) {
        let slot = match self.slot(id) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(txid = %id, participant = %participant, error = %e, "vote for unknown transaction dropped");
                return;
            }
        };
        let changed = slot.record.lock().await.record_vote(participant, vote);
        match changed {
            Ok(true) => {
                debug!(txid = %id, participant = %participant, %vote, "vote recorded");
                slot.votes_changed.notify_waiters();
            }
            Ok(false) => debug!(txid = %id, participant = %participant, "duplicate or late vote ignored"),
            Err(e) => warn!(txid = %id, error = %e, "vote rejected"),
        }
    }

    /// Persist the decision. Must succeed before anything is disseminated.
    pub async fn decide(&self, id: &TransactionId, decision: Decision) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;

        let mut next = record.clone();
        if !next.decide(decision)? {
            return Ok(());
        }
        if let Err(e) = self.log.write(&next.clone().into()) {
            error!(txid = %id, %decision, error = %e, "failed to persist decision");
            return Err(e.into());
        }
        *record = next;
        info!(txid = %id, %decision, "decision persisted");
        Ok(())
    }

    /// One dissemination round: send DECISION to every participant still
    /// pending. Returns how many are still pending afterwards.
    pub async fn disseminate(self: &Arc<Self>, id: &TransactionId) -> Result<usize> {
        let slot = self.slot(id)?;
        let (decision, pending) = {
            let record = slot.record.lock().await;
            let decision = record
                .decision
                .ok_or_else(|| ProtocolError::Undecided(id.clone()))?;
            (decision, record.pending_participants())
        };

        let mut sends = JoinSet::new();
        for participant in pending {
            let this = Arc::clone(self);
            let id = id.clone();
            sends.spawn(async move { this.deliver_decision(&id, &participant, decision).await });
        }

        let mut failure = None;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => warn!(txid = %id, error = %e, "decision delivery task failed"),
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let remaining = slot.record.lock().await.pending_participants().len();
        Ok(remaining)
    }

    async fn deliver_decision(
        &self,
        id: &TransactionId,
        participant: &NodeId,
        decision: Decision,
    ) -> Result<()> {
        let message = Message::Decision {
            id: id.clone(),
            decision,
        };
        match timeout(self.config.ack_timeout(), self.transport.send(participant, message)).await {
            Ok(Ok(Some(Message::Ack {
                id: acked,
                participant: from,
            }))) if &acked == id => self.handle_ack(&acked, &from).await,
            Ok(Ok(Some(other))) => {
                warn!(txid = %id, participant = %participant, reply = %other, "unexpected reply to DECISION");
                Ok(())
            }
            Ok(Ok(None)) => {
                debug!(txid = %id, participant = %participant, "DECISION not acknowledged");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(txid = %id, participant = %participant, error = %e, "DECISION not delivered; will retry");
                Ok(())
            }
            Err(_) => {
                warn!(txid = %id, participant = %participant, "timed out waiting for ACK");
                Ok(())
            }
        }
    }

    /// Mark a participant done. Archives the record once everyone is done.
    pub async fn handle_ack(&self, id: &TransactionId, participant: &NodeId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock().await;

        let mut next = record.clone();
        if !next.acknowledge(participant)? {
            return Ok(());
        }
        self.log.update_status(id, participant, AckStatus::Done)?;
        *record = next;
        debug!(txid = %id, participant = %participant, "acknowledged");

        if record.is_complete() {
            self.log.archive(id)?;
            self.evict(id);
            info!(txid = %id, "transaction complete");
        }
        Ok(())
    }

    /// Keep disseminating until every participant acknowledged or the
    /// configured number of rounds ran out. Returns whether it completed.
    pub async fn disseminate_until_complete(self: &Arc<Self>, id: &TransactionId) -> Result<bool> {
        let mut round = 0u32;
        loop {
            round += 1;
            let remaining = self.disseminate(id).await?;
            if remaining == 0 {
                return Ok(true);
            }
            if let Some(max) = self.config.max_dissemination_rounds {
                if round >= max {
                    warn!(txid = %id, remaining, rounds = round, "giving up on dissemination for now; record stays pending");
                    return Ok(false);
                }
            }
            debug!(txid = %id, remaining, round, "participants still pending");
            sleep(self.config.retry_interval()).await;
        }
    }

    /// Run a whole transaction: start, prepare, decide, disseminate.
    pub async fn execute(
        self: &Arc<Self>,
        id: &TransactionId,
        participants: Vec<NodeId>,
    ) -> Result<TransactionOutcome> {
        self.start_transaction(id, participants).await?;
        let decision = self.run_prepare_phase(id).await?;
        self.decide(id, decision).await?;
        let complete = self.disseminate_until_complete(id).await?;
        Ok(TransactionOutcome { decision, complete })
    }

    /// Answer an INQUIRE from the log alone.
    pub fn handle_inquire(&self, id: &TransactionId) -> InquiryAnswer {
        match self.log.read(id) {
            Ok(Some(LogRecord::Coordinator(record))) => record.decision.into(),
            Ok(_) => InquiryAnswer::Unknown,
            Err(e) => {
                error!(txid = %id, error = %e, "cannot read log to answer inquiry");
                InquiryAnswer::Unknown
            }
        }
    }

    /// Resume unfinished transactions from the log.
    ///
    /// Records that were never decided are aborted (presumed abort) before
    /// their dissemination resumes. Transactions already live in this process
    /// are left to whoever is driving them.
    pub async fn recover(self: &Arc<Self>) -> Result<Recovery> {
        let mut resumed = Vec::new();
        let mut tasks = Vec::new();

        for entry in self.log.read_all()? {
            let record = match entry {
                LogRecord::Coordinator(record) => record,
                LogRecord::Participant(stray) => {
                    warn!(txid = %stray.id, "participant record in coordinator log skipped");
                    continue;
                }
            };
            let id = record.id.clone();
            if record.is_complete() {
                self.log.archive(&id)?;
                continue;
            }
            let undecided = record.decision.is_none();
            match self.transactions.lock().entry(id.clone()) {
                Entry::Occupied(_) => {
                    debug!(txid = %id, "already live, not recovering");
                    continue;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(TxnSlot::new(record));
                }
            }

            if undecided {
                info!(txid = %id, "undecided at restart; presuming abort");
                self.decide(&id, Decision::Abort).await?;
            }

            let this = Arc::clone(self);
            let task_id = id.clone();
            tasks.push(tokio::spawn(async move {
                match this.disseminate_until_complete(&task_id).await {
                    Ok(true) => info!(txid = %task_id, "recovered transaction complete"),
                    Ok(false) => warn!(txid = %task_id, "recovered transaction still pending"),
                    Err(e) => error!(txid = %task_id, error = %e, "recovery of transaction failed"),
                }
            }));
            resumed.push(id);
        }

        info!(node = %self.id, count = resumed.len(), "coordinator recovery scheduled");
        Ok(Recovery::new(resumed, tasks))
    }

    /// Inbound dispatch for the coordinator role.
    pub async fn handle_message(&self, message: Message) -> Option<Message> {
        match message {
            Message::Vote {
                id,
                participant,
                vote,
            } => {
                self.handle_vote(&id, &participant, vote).await;
                None
            }
            Message::Ack { id, participant } => {
                if let Err(e) = self.handle_ack(&id, &participant).await {
                    error!(txid = %id, participant = %participant, error = %e, "ACK not recorded");
                }
                None
            }
            Message::Inquire { id } => {
                let answer = self.handle_inquire(&id);
                debug!(txid = %id, %answer, "answered inquiry");
                Some(Message::InquireReply { id, answer })
            }
            other => {
                warn!(verb = other.verb(), txid = %other.transaction_id(), "message not handled by coordinator");
                None
            }
        }
    }
}
