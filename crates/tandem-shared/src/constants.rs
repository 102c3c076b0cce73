/// Application name
pub const APP_NAME: &str = "Tandem";

/// Collection holding one presence/profile document per user
pub const USERS_COLLECTION: &str = "users";

/// Collection holding one conversation index document per user
pub const USER_CHATS_COLLECTION: &str = "userChats";

/// Collection holding one message array document per conversation
pub const CHATS_COLLECTION: &str = "chats";

/// Upper bound on ids in a single batched `id in {...}` subscription
pub const DEFAULT_MAX_IDS_PER_QUERY: usize = 30;

/// Maximum text length of a single message in bytes (64 KiB)
pub const MAX_MESSAGE_TEXT: usize = 65_536;

/// Preview shown when the last message is an image without text
pub const IMAGE_PREVIEW: &str = "image";

/// Preview shown for a conversation with no messages yet
pub const EMPTY_PREVIEW: &str = "Send first message";
