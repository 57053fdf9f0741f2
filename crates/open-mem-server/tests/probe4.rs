#[test]
fn probe() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE observations (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            subtitle TEXT NOT NULL DEFAULT '',
            narrative TEXT NOT NULL DEFAULT '',
            facts TEXT NOT NULL DEFAULT '[]',
            concepts TEXT NOT NULL DEFAULT '[]',
            files_read TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]'
        );
        CREATE VIRTUAL TABLE observations_fts USING fts5(
            title,
            subtitle,
            narrative,
            facts,
            concepts,
            files_read,
            files_modified,
            content='',
            contentless_delete=1,
            tokenize='porter unicode61 remove_diacritics 1'
        );
        CREATE TRIGGER observations_fts_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
            VALUES (new.rowid, new.title, new.subtitle, new.narrative, new.facts, new.concepts, new.files_read, new.files_modified);
        END;"
    ).unwrap();
    conn.execute("INSERT INTO observations(id, title) VALUES ('o1', 'Fixed login token refresh')", []).unwrap();

    let cnt: i64 = conn.query_row("SELECT count(*) FROM observations_fts", [], |r| r.get(0)).unwrap();
    println!("fts rows = {cnt}");

    for q in ["login", "login*", "(login*)"] {
        let n: i64 = conn.query_row("SELECT count(*) FROM observations_fts WHERE observations_fts MATCH ?1", [q], |r| r.get(0)).unwrap();
        println!("q={q:?} matches={n}");
    }

    let n2: i64 = conn.query_row(
        "SELECT count(*) FROM observations_fts JOIN observations o ON o.rowid = observations_fts.rowid WHERE observations_fts MATCH ?1",
        ["(login*)"], |r| r.get(0)).unwrap();
    println!("joined matches = {n2}");
}
