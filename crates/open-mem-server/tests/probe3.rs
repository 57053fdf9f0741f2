#[test]
fn probe() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE VIRTUAL TABLE t USING fts5(title, content='', contentless_delete=1, tokenize='porter unicode61 remove_diacritics 1');"
    ).unwrap();
    conn.execute("INSERT INTO t(rowid, title) VALUES (1, 'Fixed login token refresh')", []).unwrap();
    for q in ["login", "login*", "(login*)", "token", "fixed"] {
        let n: i64 = conn.query_row(&format!("SELECT count(*) FROM t WHERE t MATCH '{q}'"), [], |r| r.get(0)).unwrap();
        println!("q={q:?} matches={n}");
    }
}
