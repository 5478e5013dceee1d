/// Upper bound on rooms in the catalog.
pub const MAX_ROOMS: usize = 10_000;

/// Max length of a room name.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of any single guest contact field.
pub const MAX_GUEST_FIELD_LEN: usize = 256;

/// Longest bookable stay (and widest search / calendar window), in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Max restriction records per room.
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;
