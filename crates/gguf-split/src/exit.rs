// Exit codes, one per fatal error kind
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_SOURCE_FORMAT: i32 = 3;
pub const EXIT_SIZE_LIMIT: i32 = 4;
pub const EXIT_IO: i32 = 5;
pub const EXIT_NAMING: i32 = 6;
