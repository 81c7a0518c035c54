//! Static SQL library
//!
//! Maps semantic names to SQL text. The transformation entries are SELECT
//! statements; the stages wrap them in `INSERT INTO <table>`.

use std::collections::{BTreeMap, HashMap};

/// Entry names
pub mod names {
    pub const SONGPLAY_TABLE_INSERT: &str = "songplay_table_insert";
    pub const USER_TABLE_INSERT: &str = "user_table_insert";
    pub const SONG_TABLE_INSERT: &str = "song_table_insert";
    pub const ARTIST_TABLE_INSERT: &str = "artist_table_insert";
    pub const TIME_TABLE_INSERT: &str = "time_table_insert";

    pub const CREATE_STAGING_EVENTS: &str = "create_staging_events";
    pub const CREATE_STAGING_SONGS: &str = "create_staging_songs";
    pub const CREATE_SONGPLAYS: &str = "create_songplays";
    pub const CREATE_USERS: &str = "create_users";
    pub const CREATE_SONGS: &str = "create_songs";
    pub const CREATE_ARTISTS: &str = "create_artists";
    pub const CREATE_TIME: &str = "create_time";

    /// DDL entries in creation order
    pub const DDL: &[&str] = &[
        CREATE_STAGING_EVENTS,
        CREATE_STAGING_SONGS,
        CREATE_SONGPLAYS,
        CREATE_USERS,
        CREATE_SONGS,
        CREATE_ARTISTS,
        CREATE_TIME,
    ];
}

const SONGPLAY_TABLE_INSERT: &str = r#"
    SELECT
        md5(events.sessionid || events.start_time) songplay_id,
        events.start_time,
        events.userid,
        events.level,
        songs.song_id,
        songs.artist_id,
        events.sessionid,
        events.location,
        events.useragent
    FROM (SELECT TIMESTAMP 'epoch' + ts/1000 * interval '1 second' AS start_time, *
          FROM staging_events
          WHERE page = 'NextSong') events
    LEFT JOIN staging_songs songs
        ON events.song = songs.title
        AND events.artist = songs.artist_name
        AND events.length = songs.duration
"#;

const USER_TABLE_INSERT: &str = r#"
    SELECT DISTINCT userid, firstname, lastname, gender, level
    FROM staging_events
    WHERE page = 'NextSong'
"#;

const SONG_TABLE_INSERT: &str = r#"
    SELECT DISTINCT song_id, title, artist_id, year, duration
    FROM staging_songs
"#;

const ARTIST_TABLE_INSERT: &str = r#"
    SELECT DISTINCT artist_id, artist_name, artist_location, artist_latitude, artist_longitude
    FROM staging_songs
"#;

const TIME_TABLE_INSERT: &str = r#"
    SELECT start_time,
           extract(hour from start_time),
           extract(day from start_time),
           extract(week from start_time),
           extract(month from start_time),
           extract(year from start_time),
           extract(dayofweek from start_time)
    FROM songplays
"#;

const CREATE_STAGING_EVENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.staging_events (
        artist varchar(256),
        auth varchar(256),
        firstname varchar(256),
        gender varchar(256),
        iteminsession int4,
        lastname varchar(256),
        length numeric(18,0),
        "level" varchar(256),
        location varchar(256),
        "method" varchar(256),
        page varchar(256),
        registration numeric(18,0),
        sessionid int4,
        song varchar(256),
        status int4,
        ts int8,
        useragent varchar(256),
        userid int4
    )
"#;

const CREATE_STAGING_SONGS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.staging_songs (
        num_songs int4,
        artist_id varchar(256),
        artist_name varchar(512),
        artist_latitude numeric(18,0),
        artist_longitude numeric(18,0),
        artist_location varchar(512),
        song_id varchar(256),
        title varchar(512),
        duration numeric(18,0),
        "year" int4
    )
"#;

const CREATE_SONGPLAYS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.songplays (
        playid varchar(32) NOT NULL,
        start_time timestamp NOT NULL,
        userid int4 NOT NULL,
        "level" varchar(256),
        songid varchar(256),
        artistid varchar(256),
        sessionid int4,
        location varchar(256),
        user_agent varchar(256),
        CONSTRAINT songplays_pkey PRIMARY KEY (playid)
    )
"#;

const CREATE_USERS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.users (
        userid int4 NOT NULL,
        first_name varchar(256),
        last_name varchar(256),
        gender varchar(256),
        "level" varchar(256),
        CONSTRAINT users_pkey PRIMARY KEY (userid)
    )
"#;

const CREATE_SONGS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.songs (
        songid varchar(256) NOT NULL,
        title varchar(512),
        artistid varchar(256),
        "year" int4,
        duration numeric(18,0),
        CONSTRAINT songs_pkey PRIMARY KEY (songid)
    )
"#;

const CREATE_ARTISTS: &str = r#"
    CREATE TABLE IF NOT EXISTS public.artists (
        artistid varchar(256) NOT NULL,
        name varchar(512),
        location varchar(512),
        lattitude numeric(18,0),
        longitude numeric(18,0)
    )
"#;

const CREATE_TIME: &str = r#"
    CREATE TABLE IF NOT EXISTS public."time" (
        start_time timestamp NOT NULL,
        "hour" int4,
        "day" int4,
        week int4,
        "month" varchar(256),
        "year" int4,
        weekday varchar(256),
        CONSTRAINT time_pkey PRIMARY KEY (start_time)
    )
"#;

const BUILTIN: &[(&str, &str)] = &[
    (names::SONGPLAY_TABLE_INSERT, SONGPLAY_TABLE_INSERT),
    (names::USER_TABLE_INSERT, USER_TABLE_INSERT),
    (names::SONG_TABLE_INSERT, SONG_TABLE_INSERT),
    (names::ARTIST_TABLE_INSERT, ARTIST_TABLE_INSERT),
    (names::TIME_TABLE_INSERT, TIME_TABLE_INSERT),
    (names::CREATE_STAGING_EVENTS, CREATE_STAGING_EVENTS),
    (names::CREATE_STAGING_SONGS, CREATE_STAGING_SONGS),
    (names::CREATE_SONGPLAYS, CREATE_SONGPLAYS),
    (names::CREATE_USERS, CREATE_USERS),
    (names::CREATE_SONGS, CREATE_SONGS),
    (names::CREATE_ARTISTS, CREATE_ARTISTS),
    (names::CREATE_TIME, CREATE_TIME),
];

/// SQL library errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlLibraryError {
    #[error("Unknown SQL library entry: {0}")]
    UnknownEntry(String),

    #[error("SQL library entry '{0}' is empty")]
    EmptyEntry(String),
}

/// Name -> SQL text mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlLibrary {
    entries: BTreeMap<String, String>,
}

impl SqlLibrary {
    /// The built-in statements
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(name, sql)| (name.to_string(), sql.trim().to_string()))
            .collect();
        Self { entries }
    }

    /// Built-in statements with config overrides applied
    ///
    /// Overrides may replace an entry or add a new one.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self, SqlLibraryError> {
        let mut library = Self::builtin();
        for (name, sql) in overrides {
            library.insert(name, sql)?;
        }
        Ok(library)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, name: &str, sql: &str) -> Result<(), SqlLibraryError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(SqlLibraryError::EmptyEntry(name.to_string()));
        }
        self.entries.insert(name.to_string(), sql.to_string());
        Ok(())
    }

    /// Remove an entry, returning its SQL
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Result<&str, SqlLibraryError> {
        self.entries
            .get(name)
            .map(|s| s.as_str())
            .ok_or_else(|| SqlLibraryError::UnknownEntry(name.to_string()))
    }

    /// All entry names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// All entries, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// DDL statements in creation order
    pub fn ddl(&self) -> Result<Vec<(&'static str, &str)>, SqlLibraryError> {
        names::DDL
            .iter()
            .map(|name| self.get(name).map(|sql| (*name, sql)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SqlLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_entries() {
        let library = SqlLibrary::builtin();
        assert_eq!(library.len(), BUILTIN.len());

        let songplays = library.get(names::SONGPLAY_TABLE_INSERT).unwrap();
        assert!(songplays.starts_with("SELECT"));
        assert!(songplays.contains("staging_events"));
        assert!(songplays.contains("staging_songs"));

        let users = library.get(names::USER_TABLE_INSERT).unwrap();
        assert!(users.contains("page = 'NextSong'"));
    }

    #[test]
    fn unknown_entry() {
        let library = SqlLibrary::builtin();
        assert_eq!(
            library.get("no_such_query"),
            Err(SqlLibraryError::UnknownEntry("no_such_query".to_string()))
        );
    }

    #[test]
    fn overrides_replace_and_add() {
        let mut overrides = HashMap::new();
        overrides.insert(names::USER_TABLE_INSERT.to_string(), "  SELECT 1  ".to_string());
        overrides.insert("extra_check".to_string(), "SELECT 2".to_string());

        let library = SqlLibrary::with_overrides(&overrides).unwrap();
        assert_eq!(library.get(names::USER_TABLE_INSERT).unwrap(), "SELECT 1");
        assert_eq!(library.get("extra_check").unwrap(), "SELECT 2");
        assert_eq!(library.len(), BUILTIN.len() + 1);
    }

    #[test]
    fn empty_override_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert(names::SONG_TABLE_INSERT.to_string(), "   ".to_string());
        assert_eq!(
            SqlLibrary::with_overrides(&overrides),
            Err(SqlLibraryError::EmptyEntry(names::SONG_TABLE_INSERT.to_string()))
        );
    }

    #[test]
    fn ddl_in_creation_order() {
        let library = SqlLibrary::builtin();
        let ddl = library.ddl().unwrap();
        assert_eq!(ddl.len(), 7);
        assert_eq!(ddl[0].0, names::CREATE_STAGING_EVENTS);
        assert!(ddl.iter().all(|(_, sql)| sql.starts_with("CREATE TABLE IF NOT EXISTS")));
    }
}
