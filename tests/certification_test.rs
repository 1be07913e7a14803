// Commit-time certification and recovery behavior, end to end.

use std::io::Cursor;

use replidb::run_script;

fn run(script: &str) -> Vec<String> {
    let out = run_script(Cursor::new(script), Vec::new()).expect("script runs");
    String::from_utf8(out)
        .expect("utf8 output")
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn dangerous_structure_aborts_the_last_committer() {
    // Three overlapping transactions whose conflict edges close the cycle
    // T1 -rw-> T2 -rw-> T3 -wr-> T1 when T1 asks to commit: T3 wrote x8
    // that T1 read, T2 wrote x2 that T3 read, T1 wrote x4 that T2 read.
    let lines = run(
        "begin(T1)\nbegin(T2)\nbegin(T3)\n\
         R(T3,x2)\nW(T3,x8,88)\nR(T2,x4)\nend(T3)\n\
         W(T2,x2,22)\nend(T2)\n\
         R(T1,x8)\nW(T1,x4,44)\nend(T1)\n",
    );
    assert_eq!(
        lines,
        [
            "T1 begins",
            "T2 begins",
            "T3 begins",
            "T3 reads x2: 20",
            "T3 writes x8: 88",
            "T2 reads x4: 40",
            "T3 commits",
            "T2 writes x2: 22",
            "T2 commits",
            "T1 reads x8: 88",
            "T1 writes x4: 44",
            "T1 aborts due to dangerous structure"
        ]
    );
}

#[test]
fn down_event_between_write_and_commit_invalidates_it() {
    // Site 3 was down when the write staged, so the transaction never
    // touched it; the crash after its recovery still falls between the
    // write tick and the commit tick and must invalidate the commit.
    let lines = run(
        "begin(T1)\nfail(3)\nW(T1,x2,30)\nrecover(3)\nfail(3)\nend(T1)\n",
    );
    assert_eq!(
        lines,
        [
            "T1 begins",
            "site 3 fails",
            "T1 writes x2: 30",
            "site 3 recovers",
            "site 3 fails",
            "T1 aborts due to previous access of a down site"
        ]
    );
}

#[test]
fn committed_write_restores_a_recovered_replica() {
    let lines = run(
        "fail(3)\nrecover(3)\nbegin(T1)\nR(T1,x2)\n\
         begin(T2)\nW(T2,x2,5)\nend(T2)\nend(T1)\n",
    );
    assert_eq!(
        lines,
        [
            "site 3 fails",
            "site 3 recovers",
            "T1 begins",
            "T1 blocked",
            "T2 begins",
            "T2 writes x2: 5",
            "T2 commits",
            "T1 reads x2: 5",
            "T1 commits"
        ]
    );
}

#[test]
fn odd_variables_are_readable_right_after_recovery() {
    let lines = run("fail(4)\nrecover(4)\nbegin(T1)\nR(T1,x3)\nend(T1)\n");
    assert_eq!(
        lines,
        [
            "site 4 fails",
            "site 4 recovers",
            "T1 begins",
            "T1 reads x3: 30",
            "T1 commits"
        ]
    );
}

#[test]
fn write_to_a_variable_with_no_live_site_parks() {
    let lines = run("fail(4)\nbegin(T1)\nW(T1,x3,9)\nrecover(4)\nend(T1)\n");
    assert_eq!(
        lines,
        [
            "site 4 fails",
            "T1 begins",
            "T1 blocked",
            "site 4 recovers",
            "T1 writes x3: 9",
            "T1 commits"
        ]
    );
}

#[test]
fn read_only_fails_fast_when_no_site_qualifies() {
    let lines = run("fail(4)\nbeginRO(T1)\nR(T1,x3)\n");
    assert_eq!(
        lines,
        [
            "site 4 fails",
            "T1 begins and is read-only",
            "T1 aborts due to unavailable snapshot"
        ]
    );
}

#[test]
fn crash_between_snapshot_version_and_snapshot_point_disqualifies() {
    // x3's only copy crashed after the version committed; even though the
    // site is back, the open interval between the version's commit and the
    // snapshot start contains a down event.
    let lines = run(
        "begin(T1)\nW(T1,x3,35)\nend(T1)\nfail(4)\nrecover(4)\n\
         beginRO(T2)\nR(T2,x3)\n",
    );
    assert_eq!(
        lines,
        [
            "T1 begins",
            "T1 writes x3: 35",
            "T1 commits",
            "site 4 fails",
            "site 4 recovers",
            "T2 begins and is read-only",
            "T2 aborts due to unavailable snapshot"
        ]
    );
}

#[test]
fn dump_annotates_down_sites() {
    let lines = run("fail(5)\ndump()\n");
    assert_eq!(lines[0], "site 5 fails");
    assert_eq!(lines.len(), 11);
    assert_eq!(
        lines[5],
        "site 5 (down) - x2: 20, x4: 40, x6: 60, x8: 80, x10: 100, \
         x12: 120, x14: 140, x16: 160, x18: 180, x20: 200"
    );
    assert!(lines[1].starts_with("site 1 - "));
}
