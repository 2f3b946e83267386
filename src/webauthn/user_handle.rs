//! # User Handles
//!
//! The user handle is the opaque id a relying party embeds in a credential at
//! registration time. Discoverable (usernameless) login depends on it: the
//! authenticator hands it back with the assertion and it is the only thing
//! that tells the server who is logging in.
//!
//! We use the numeric user id as the handle, encoded as exactly 8 big-endian
//! bytes. Anything that is not 8 bytes, or that decodes to a negative id, is
//! rejected instead of being decoded into some other user's id.

/// Encoded width of a user handle in bytes
pub const USER_HANDLE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserHandle([u8; USER_HANDLE_LEN]);

impl UserHandle {
    /// Encode a user id; `None` for negative ids, which have no handle
    pub fn from_user_id(user_id: i64) -> Option<Self> {
        u64::try_from(user_id)
            .ok()
            .map(|id| Self(id.to_be_bytes()))
    }

    /// Decode a handle returned by an authenticator
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; USER_HANDLE_LEN] = bytes.try_into().ok()?;
        // the top bit would turn into a negative id
        i64::try_from(u64::from_be_bytes(bytes)).ok()?;
        Some(Self(bytes))
    }

    pub fn user_id(&self) -> i64 {
        // decode/from_user_id guarantee the value fits
        u64::from_be_bytes(self.0) as i64
    }

    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_big_endian() {
        let handle = UserHandle::from_user_id(42).unwrap();
        assert_eq!(handle.as_bytes(), &[0, 0, 0, 0, 0, 0, 0, 42]);

        let handle = UserHandle::from_user_id(0x0102_0304_0506_0708).unwrap();
        assert_eq!(handle.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn decode_restores_user_id() {
        let handle = UserHandle::from_user_id(987_654_321).unwrap();
        let decoded = UserHandle::decode(handle.as_bytes()).unwrap();
        assert_eq!(decoded.user_id(), 987_654_321);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(UserHandle::decode(&[]).is_none());
        assert!(UserHandle::decode(&[0, 0, 0, 42]).is_none());
        assert!(UserHandle::decode(&[0; 16]).is_none());
    }

    #[test]
    fn rejects_negative_ids() {
        assert!(UserHandle::from_user_id(-1).is_none());
        assert!(UserHandle::decode(&[0x80, 0, 0, 0, 0, 0, 0, 1]).is_none());
    }
}
