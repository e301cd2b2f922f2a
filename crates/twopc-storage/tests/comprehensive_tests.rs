//! # comprehensive log tests
//!
//! why: verify both log implementations honour the same durability contract
//! relations: tests twopc-storage crate
//! what: write/read, partial updates, archival, crash recovery, corrupt data

use std::fs;
use tempfile::tempdir;
use twopc_core::{
    AckStatus, CoordinatorRecord, Decision, LogRecord, NodeId, ParticipantRecord,
    ParticipantState, TransactionId,
};
use twopc_storage::{FileLog, InMemoryLog, LogError, TransactionLog};

fn txid(raw: &str) -> TransactionId {
    TransactionId::new(raw).unwrap()
}

fn node(raw: &str) -> NodeId {
    NodeId::new(raw).unwrap()
}

fn coordinator_record(id: &str, decision: Option<Decision>) -> LogRecord {
    let mut rec = CoordinatorRecord::new(txid(id), vec![node("P1"), node("P2")]);
    if let Some(decision) = decision {
        rec.decide(decision).unwrap();
    }
    rec.into()
}

fn uncertain_record(id: &str) -> LogRecord {
    let mut rec = ParticipantRecord::new(txid(id));
    rec.vote_yes().unwrap();
    rec.into()
}

/// contract checks shared by every implementation
fn check_contract(log: &dyn TransactionLog) {
    // empty log
    assert!(log.read_all().unwrap().is_empty());
    assert_eq!(log.read(&txid("T1")).unwrap(), None);

    // write then overwrite the same id
    log.write(&coordinator_record("T1", None)).unwrap();
    log.write(&coordinator_record("T1", Some(Decision::Commit))).unwrap();
    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].as_coordinator().unwrap().decision,
        Some(Decision::Commit)
    );

    // partial update
    log.update_status(&txid("T1"), &node("P2"), AckStatus::Done).unwrap();
    let rec = log.read(&txid("T1")).unwrap().unwrap();
    assert_eq!(
        rec.as_coordinator().unwrap().pending_participants(),
        vec![node("P1")]
    );

    // done never regresses
    log.update_status(&txid("T1"), &node("P2"), AckStatus::Pending).unwrap();
    let rec = log.read(&txid("T1")).unwrap().unwrap();
    assert_eq!(
        rec.as_coordinator().unwrap().entry(&node("P2")).unwrap().status,
        AckStatus::Done
    );

    // archival hides from read_all but not from read
    log.archive(&txid("T1")).unwrap();
    assert!(log.read_all().unwrap().is_empty());
    assert!(log.read(&txid("T1")).unwrap().is_some());
    log.archive(&txid("T1")).unwrap();
}

// =============================================================================
// SECTION 1: IN-MEMORY LOG TESTS
// =============================================================================

mod in_memory {
    use super::*;

    #[test]
    fn honours_contract() {
        check_contract(&InMemoryLog::new());
    }

    #[test]
    fn update_status_on_missing_record_fails() {
        let log = InMemoryLog::new();
        assert!(matches!(
            log.update_status(&txid("nope"), &node("P1"), AckStatus::Done),
            Err(LogError::NotFound(_))
        ));
    }

    #[test]
    fn update_status_on_participant_record_fails() {
        let log = InMemoryLog::new();
        log.write(&uncertain_record("T1")).unwrap();
        assert!(matches!(
            log.update_status(&txid("T1"), &node("P1"), AckStatus::Done),
            Err(LogError::NotCoordinatorRecord(_))
        ));
    }

    #[test]
    fn update_status_for_unknown_participant_fails() {
        let log = InMemoryLog::new();
        log.write(&coordinator_record("T1", Some(Decision::Abort))).unwrap();
        assert!(matches!(
            log.update_status(&txid("T1"), &node("P7"), AckStatus::Done),
            Err(LogError::UnknownParticipant { .. })
        ));
    }

    #[test]
    fn archive_of_missing_record_fails() {
        let log = InMemoryLog::new();
        assert!(matches!(
            log.archive(&txid("T1")),
            Err(LogError::NotFound(_))
        ));
    }

    #[test]
    fn rewriting_archived_id_reactivates_it() {
        let log = InMemoryLog::new();
        log.write(&uncertain_record("T1")).unwrap();
        log.archive(&txid("T1")).unwrap();

        log.write(&uncertain_record("T1")).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn read_all_is_sorted_by_id() {
        let log = InMemoryLog::new();
        log.write(&uncertain_record("T3")).unwrap();
        log.write(&uncertain_record("T1")).unwrap();
        log.write(&uncertain_record("T2")).unwrap();

        let ids: Vec<_> = log
            .read_all()
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
    }
}

// =============================================================================
// SECTION 2: FILE LOG TESTS
// =============================================================================

mod file_log {
    use super::*;

    #[test]
    fn honours_contract() {
        let dir = tempdir().unwrap();
        check_contract(&FileLog::open(dir.path()).unwrap());
    }

    #[test]
    fn open_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node_log");

        FileLog::open(&path).unwrap();

        assert!(path.join("active").is_dir());
        assert!(path.join("archive").is_dir());
    }

    #[test]
    fn records_are_human_readable_json() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&coordinator_record("T1", Some(Decision::Commit))).unwrap();

        let file = fs::read_dir(dir.path().join("active"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let contents = fs::read_to_string(file).unwrap();

        assert!(contents.contains("\"decision\": \"commit\""));
        assert!(contents.contains("\"status\": \"pending\""));
        assert!(contents.contains("\"role\": \"coordinator\""));
    }

    #[test]
    fn no_temp_files_left_after_write() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&uncertain_record("T1")).unwrap();

        let leftovers = fs::read_dir(dir.path().join("active"))
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn update_status_reaches_archived_record() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&coordinator_record("T1", Some(Decision::Commit))).unwrap();
        log.archive(&txid("T1")).unwrap();

        log.update_status(&txid("T1"), &node("P1"), AckStatus::Done).unwrap();

        let rec = log.read(&txid("T1")).unwrap().unwrap();
        assert_eq!(
            rec.as_coordinator().unwrap().entry(&node("P1")).unwrap().status,
            AckStatus::Done
        );
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&uncertain_record("T1")).unwrap();

        let file = fs::read_dir(dir.path().join("active"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        fs::write(&file, "{ not json").unwrap();

        assert!(matches!(log.read_all(), Err(LogError::Corrupt(_))));
    }

    #[test]
    fn rewriting_archived_id_reactivates_it() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&uncertain_record("T1")).unwrap();
        log.archive(&txid("T1")).unwrap();

        log.write(&uncertain_record("T1")).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
        assert_eq!(fs::read_dir(dir.path().join("archive")).unwrap().count(), 0);

        // archiving again must not trip over a leftover copy
        log.archive(&txid("T1")).unwrap();
        assert!(log.read_all().unwrap().is_empty());
        assert!(log.read(&txid("T1")).unwrap().is_some());
    }

    #[test]
    fn stray_temp_file_is_ignored_by_scan() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        fs::write(dir.path().join("active").join("deadbeef.tmp"), "partial").unwrap();

        assert!(log.read_all().unwrap().is_empty());
    }
}

// =============================================================================
// SECTION 3: CRASH RECOVERY / PERSISTENCE TESTS
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn decision_survives_restart() {
        let dir = tempdir().unwrap();

        // first "session"
        {
            let log = FileLog::open(dir.path()).unwrap();
            log.write(&coordinator_record("T3", Some(Decision::Commit))).unwrap();
        }

        // "restart" - new log instance
        {
            let log = FileLog::open(dir.path()).unwrap();
            let records = log.read_all().unwrap();

            assert_eq!(records.len(), 1);
            let rec = records[0].as_coordinator().unwrap();
            assert_eq!(rec.decision, Some(Decision::Commit));
            assert_eq!(rec.pending_participants().len(), 2);
        }
    }

    #[test]
    fn uncertain_state_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let log = FileLog::open(dir.path()).unwrap();
            log.write(&uncertain_record("T3")).unwrap();
        }

        {
            let log = FileLog::open(dir.path()).unwrap();
            let rec = log.read(&txid("T3")).unwrap().unwrap();
            assert_eq!(
                rec.as_participant().unwrap().state,
                ParticipantState::Uncertain
            );
        }
    }

    #[test]
    fn archived_records_stay_out_of_recovery_scan() {
        let dir = tempdir().unwrap();

        {
            let log = FileLog::open(dir.path()).unwrap();
            log.write(&coordinator_record("done", Some(Decision::Abort))).unwrap();
            log.write(&coordinator_record("open", Some(Decision::Abort))).unwrap();
            log.archive(&txid("done")).unwrap();
        }

        {
            let log = FileLog::open(dir.path()).unwrap();
            let ids: Vec<_> = log.read_all().unwrap().iter().map(|r| r.id().clone()).collect();
            assert_eq!(ids, vec![txid("open")]);
            assert!(log.read(&txid("done")).unwrap().is_some());
        }
    }
}
