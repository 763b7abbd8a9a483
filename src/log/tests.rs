use bytes::Bytes;

use crate::message::{LogEntry, LogIndex, Term};

use super::Log;

/// Instantiates the conformance tests for a type implementing [`Log`].
#[macro_export]
macro_rules! log_suite {
    ($ty:ty, $new:expr) => {
        $crate::log_case! { $ty, $new, test_log_empty }
        $crate::log_case! { $ty, $new, test_log_append }
        $crate::log_case! { $ty, $new, test_log_truncate_from }
        $crate::log_case! { $ty, $new, test_log_entries_from }
    };
}

/// Instantiates one conformance test for a type implementing [`Log`].
#[macro_export]
macro_rules! log_case {
    ($ty:ty, $new:expr, $test:ident) => {
        #[test]
        fn $test() {
            let mut log: $ty = $new;
            $crate::log::tests::$test(&mut log);
        }
    };
}

pub fn test_log_empty<L: Log>(log: &mut L) {
    verify_log(log, &[], LogIndex::default(), LogIndex::default());
}

pub fn test_log_append<L: Log>(log: &mut L) {
    let entries = test_entries();
    for (offset, entry) in entries.iter().cloned().enumerate() {
        log.append(entry).unwrap_or_else(|_| panic!());
        verify_log(
            log,
            &entries,
            LogIndex::default(),
            LogIndex(1 + offset as u64),
        );
    }
}

pub fn test_log_truncate_from<L: Log>(log: &mut L) {
    let entries = append_test_entries(log);
    for &truncate_len in &[1, 2, 1] {
        let last_log_index = log.last_index();
        log.truncate_from(last_log_index + 2).unwrap_err();
        log.truncate_from(last_log_index + 1).unwrap_err();
        verify_log(log, &entries, LogIndex::default(), last_log_index);
        assert_eq!(
            log.truncate_from(last_log_index + 1 - truncate_len)
                .map_err(drop),
            Ok(truncate_len as usize)
        );
        verify_log(
            log,
            &entries,
            LogIndex::default(),
            last_log_index - truncate_len,
        );
    }
    log.truncate_from(log.last_index() + 2).unwrap_err();
    log.truncate_from(log.last_index() + 1).unwrap_err();
}

pub fn test_log_entries_from<L: Log>(log: &mut L) {
    assert_eq!(log.entries_from(LogIndex(1)), Vec::new());
    let entries = append_test_entries(log);
    assert_eq!(log.entries_from(LogIndex(1)), entries.to_vec());
    assert_eq!(log.entries_from(LogIndex(3)), entries[2..].to_vec());
    assert_eq!(log.entries_from(log.last_index()), entries[4..].to_vec());
    assert_eq!(log.entries_from(log.last_index() + 1), Vec::new());
}

//
// internal
//

fn test_entries() -> [LogEntry; 5] {
    [
        LogEntry {
            term: Term(1),
            command: Bytes::from_static(&[]),
        },
        LogEntry {
            term: Term(1),
            command: Bytes::from_static(&[2; 1]),
        },
        LogEntry {
            term: Term(2),
            command: Bytes::from_static(&[3; 2]),
        },
        LogEntry {
            term: Term(9),
            command: Bytes::from_static(&[4; 100]),
        },
        LogEntry {
            term: Term(u64::max_value()),
            command: Bytes::from_static(&[5; 100]),
        },
    ]
}

fn append_test_entries<L: Log>(log: &mut L) -> [LogEntry; 5] {
    let entries = test_entries();
    entries
        .iter()
        .cloned()
        .for_each(|entry| log.append(entry).unwrap_or_else(|_| panic!()));
    entries
}

fn verify_log<L: Log>(
    log: &mut L,
    entries: &[LogEntry],
    prev_log_index: LogIndex,
    last_log_index: LogIndex,
) {
    assert_eq!(log.prev_index(), prev_log_index);

    assert_eq!(log.get(LogIndex::default()), None);
    assert_eq!(log.get_len(LogIndex::default()), None);

    assert_eq!(log.get(prev_log_index), None);
    assert_eq!(
        log.term_at(prev_log_index),
        Some(
            prev_log_index
                .0
                .checked_sub(1)
                .map(|offset| entries[offset as usize].term)
                .unwrap_or_default()
        )
    );
    assert_eq!(log.get_len(prev_log_index), None);

    assert_eq!(log.last_index(), last_log_index);
    assert_eq!(
        log.last_term(),
        log.last_index()
            .0
            .checked_sub(1)
            .map(|offset| entries[offset as usize].term)
            .unwrap_or_default()
    );

    verify_entries(entries, prev_log_index, last_log_index, |index, entry| {
        assert_eq!(log.get(index).as_ref(), entry);
        assert_eq!(log.term_at(index), entry.map(|entry| entry.term));
        assert_eq!(
            log.get_len(index),
            entry.map(|entry| log.entry_len(&entry))
        );
    });
}

fn verify_entries<F>(
    entries: &[LogEntry],
    prev_log_index: LogIndex,
    last_log_index: LogIndex,
    mut fun: F,
) where
    F: FnMut(LogIndex, Option<&LogEntry>),
{
    for index in 0..prev_log_index.0 {
        fun(LogIndex(index), None);
    }
    for offset in prev_log_index.0..last_log_index.0 {
        fun(LogIndex(1 + offset), Some(&entries[offset as usize]));
    }
    for offset in last_log_index.0..=entries.len() as u64 {
        fun(LogIndex(1 + offset), None);
    }
}
