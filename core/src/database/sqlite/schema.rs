//! The on-disk schema, laid down in one shot for a fresh database.

pub const SCHEMA: &str = "
CREATE TABLE version (
    version INTEGER NOT NULL
);

CREATE TABLE channels (
    short_channel_id TEXT PRIMARY KEY,
    node0 TEXT NOT NULL,
    node1 TEXT NOT NULL,
    satoshis INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    open TEXT,
    close TEXT,
    txs TEXT NOT NULL DEFAULT '{\"a\":[],\"b\":[],\"funding\":[]}',
    a INTEGER,
    b INTEGER,
    funder INTEGER,
    closer TEXT,
    taken TEXT
);
CREATE INDEX index_scid ON channels(short_channel_id);
CREATE INDEX index_node0 ON channels(node0);
CREATE INDEX index_node1 ON channels(node1);

CREATE TABLE nodealiases (
    pubkey TEXT NOT NULL,
    alias TEXT NOT NULL,
    color TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);
CREATE INDEX index_pubkey ON nodealiases(pubkey);

CREATE TABLE features (
    pubkey TEXT NOT NULL,
    features TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);
CREATE INDEX index_features_pubkey ON features(pubkey);

CREATE TABLE policies (
    short_channel_id TEXT NOT NULL,
    direction INTEGER NOT NULL,
    base_fee_millisatoshi INTEGER NOT NULL,
    fee_per_millionth INTEGER NOT NULL,
    delay INTEGER NOT NULL,
    update_time INTEGER NOT NULL
);
CREATE INDEX index_policies_scid ON policies(short_channel_id, direction);

CREATE TABLE try_later (
    short_channel_id TEXT PRIMARY KEY,
    txid TEXT NOT NULL,
    tries INTEGER NOT NULL DEFAULT 0
);

-- Materialized aggregates (C7). Recomputed wholesale by recompute_aggregates.
CREATE TABLE nodes (
    pubkey TEXT PRIMARY KEY,
    alias TEXT,
    oldestchannel INTEGER,
    openchannels INTEGER NOT NULL,
    closedchannels INTEGER NOT NULL,
    capacity INTEGER NOT NULL,
    avg_duration INTEGER,
    avg_open_fee INTEGER,
    avg_close_fee INTEGER
);

CREATE TABLE globalstats (
    last_block INTEGER,
    max_channel_duration INTEGER NOT NULL,
    max_channel_open_fee INTEGER NOT NULL,
    max_channel_close_fee INTEGER NOT NULL,
    max_channel_satoshis INTEGER NOT NULL,
    max_node_capacity INTEGER NOT NULL,
    max_node_openchannels INTEGER NOT NULL,
    max_node_closedchannels INTEGER NOT NULL,
    max_node_allchannels INTEGER NOT NULL
);

CREATE TABLE closetypes (
    blockgroup INTEGER NOT NULL,
    unknown INTEGER NOT NULL,
    unused INTEGER NOT NULL,
    mutual INTEGER NOT NULL,
    force INTEGER NOT NULL,
    force_unused INTEGER NOT NULL,
    penalty INTEGER NOT NULL
);
";
