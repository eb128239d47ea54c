pub const SCHEMA: &str = r#"
-- Photos table: one row per distinct image, keyed by the media source id
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    uri TEXT NOT NULL,
    display_name TEXT NOT NULL,
    date_added TEXT NOT NULL,
    date_modified TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    mime_type TEXT,
    content_hash TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    has_faces INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT      -- NULL until face extraction has run
);

CREATE INDEX IF NOT EXISTS idx_photos_content_hash ON photos(content_hash);
CREATE INDEX IF NOT EXISTS idx_photos_processed ON photos(processed_at);

-- Faces: immutable detections, replaced wholesale on re-extraction
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    bbox_left REAL NOT NULL,
    bbox_top REAL NOT NULL,
    bbox_right REAL NOT NULL,
    bbox_bottom REAL NOT NULL,
    embedding BLOB NOT NULL,        -- little-endian f32 array
    embedding_dim INTEGER NOT NULL,
    confidence REAL NOT NULL,
    detected_at TEXT NOT NULL,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces(photo_id);

-- People: named identities, only removed by explicit user action
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    cover_photo_uri TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Person to photo association
CREATE TABLE IF NOT EXISTS person_photos (
    person_id INTEGER NOT NULL,
    photo_id INTEGER NOT NULL,
    linked_at TEXT NOT NULL,
    PRIMARY KEY (person_id, photo_id),
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_person_photos_photo ON person_photos(photo_id);

-- Suggestions: proposed face to person matches and their resolution
CREATE TABLE IF NOT EXISTS suggestions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id INTEGER NOT NULL,
    suggested_person_id INTEGER,    -- NULL proposes a new person
    similarity_score REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'accepted', 'rejected'
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    FOREIGN KEY (face_id) REFERENCES faces(id) ON DELETE CASCADE,
    FOREIGN KEY (suggested_person_id) REFERENCES people(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_suggestions_face ON suggestions(face_id);
CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions(status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_suggestions_one_pending
    ON suggestions(face_id) WHERE status = 'pending';

-- Folders observed for changes
CREATE TABLE IF NOT EXISTS watch_folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
"#;
