pub const SCHEMA: &str = r#"
-- Accounts that raw contacts are synced from
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_type TEXT NOT NULL,
    data_set TEXT,
    account_name TEXT NOT NULL,
    writable INTEGER NOT NULL DEFAULT 1,
    photo_priority INTEGER NOT NULL DEFAULT 0,
    UNIQUE (account_type, data_set, account_name)
);

-- Aggregates: the user-facing merged contacts, owned by the aggregator
CREATE TABLE IF NOT EXISTS aggregates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name_raw_contact_id INTEGER,
    display_name TEXT,
    photo_data_id INTEGER,
    lookup_key TEXT,
    custom_ringtone TEXT,
    starred INTEGER NOT NULL DEFAULT 0,
    send_to_voicemail INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER NOT NULL DEFAULT -1,
    has_phone_number INTEGER NOT NULL DEFAULT 0,
    times_contacted INTEGER NOT NULL DEFAULT 0,
    last_contacted INTEGER,
    in_default_directory INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_aggregates_visible ON aggregates(in_default_directory);

-- Raw contacts: one observation of a person from one account
CREATE TABLE IF NOT EXISTS raw_contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    aggregate_id INTEGER,              -- NULL until aggregated (or when disabled)
    aggregation_mode INTEGER NOT NULL DEFAULT 0,
    aggregation_needed INTEGER NOT NULL DEFAULT 0,
    display_name TEXT,
    display_name_source INTEGER NOT NULL DEFAULT 0,
    name_verified INTEGER NOT NULL DEFAULT 0,
    starred INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER NOT NULL DEFAULT -1,
    send_to_voicemail INTEGER NOT NULL DEFAULT 0,
    custom_ringtone TEXT,
    times_contacted INTEGER NOT NULL DEFAULT 0,
    last_contacted INTEGER,
    source_id TEXT,
    hidden INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (aggregate_id) REFERENCES aggregates(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_contacts_aggregate ON raw_contacts(aggregate_id);
CREATE INDEX IF NOT EXISTS idx_raw_contacts_needed ON raw_contacts(aggregation_needed);

-- Data items: emails, phones, identities and photos
CREATE TABLE IF NOT EXISTS data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_contact_id INTEGER NOT NULL,
    kind TEXT NOT NULL,                -- 'email', 'phone', 'identity', 'photo'
    value TEXT,                        -- address, number, identity or photo reference
    namespace TEXT,                    -- identity namespace
    is_super_primary INTEGER NOT NULL DEFAULT 0,
    pixel_count INTEGER,
    file_size INTEGER,
    FOREIGN KEY (raw_contact_id) REFERENCES raw_contacts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_data_raw_contact ON data(raw_contact_id);
CREATE INDEX IF NOT EXISTS idx_data_kind_value ON data(kind, value);

-- Phone index keyed by the reversed trailing digits
CREATE TABLE IF NOT EXISTS phone_lookup (
    data_id INTEGER PRIMARY KEY,
    raw_contact_id INTEGER NOT NULL,
    normalized_number TEXT NOT NULL,
    min_match TEXT NOT NULL,
    FOREIGN KEY (data_id) REFERENCES data(id) ON DELETE CASCADE,
    FOREIGN KEY (raw_contact_id) REFERENCES raw_contacts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_phone_lookup_min_match ON phone_lookup(min_match);

-- Name lookup tokens derived from display names and emails
CREATE TABLE IF NOT EXISTS name_lookup (
    raw_contact_id INTEGER NOT NULL,
    normalized_name TEXT NOT NULL,
    name_type INTEGER NOT NULL,
    PRIMARY KEY (raw_contact_id, normalized_name, name_type),
    FOREIGN KEY (raw_contact_id) REFERENCES raw_contacts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_name_lookup_name ON name_lookup(normalized_name);

-- User overrides, stored with raw_contact_id1 < raw_contact_id2
CREATE TABLE IF NOT EXISTS aggregation_exceptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type INTEGER NOT NULL,
    raw_contact_id1 INTEGER NOT NULL,
    raw_contact_id2 INTEGER NOT NULL,
    UNIQUE (raw_contact_id1, raw_contact_id2)
);

CREATE INDEX IF NOT EXISTS idx_exceptions_raw2 ON aggregation_exceptions(raw_contact_id2);
"#;
