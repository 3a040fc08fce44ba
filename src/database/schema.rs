pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        UNIQUE(collection, id)
    );

    CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
";
