use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_TITLE_LEN: usize = 1024;
pub const MAX_PARTICIPANTS: usize = 500;
pub const MAX_PARTICIPANT_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_RSVP_LEN: usize = 64;

pub const MAX_MEETINGS_PER_TENANT: usize = 1_000_000;
pub const MAX_BATCH_SIZE: usize = 1000;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Upper bound on one encoded WAL record. A meeting at every limit above
/// encodes well inside it; a longer length prefix marks a corrupt record.
pub const MAX_WAL_RECORD_LEN: usize = 4096
    + MAX_TITLE_LEN
    + MAX_PARTICIPANTS * (MAX_PARTICIPANT_NAME_LEN + MAX_EMAIL_LEN + MAX_RSVP_LEN + 3 * 8);

/// Longest WAL file stem, after escaping, that stays clear of filesystem
/// name limits.
pub const MAX_TENANT_FILE_STEM_LEN: usize = 200;
