//! Cache key and pub/sub channel naming.
//!
//! Record keys are `{kind}:{id}` (e.g. `message:12`), index keys are the
//! container name (e.g. `conversation:7:messages`) and the index cardinality
//! lives under `{container}:count`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::domain::types::{Container, EntityKey};

use super::backend::CacheError;

/// Width of an encoded sorted-set member.
const MEMBER_WIDTH: usize = 20;

pub fn record_key(key: &EntityKey) -> String {
    key.to_string()
}

pub fn index_key(container: &Container) -> String {
    container.to_string()
}

pub fn index_count_key(container: &Container) -> String {
    format!("{container}:count")
}

/// Key holding the highest message ID `user_id` has seen in a conversation.
pub fn watermark_key(user_id: i64, conversation_id: i64) -> String {
    format!("seen:{user_id}:{conversation_id}")
}

pub fn user_channel(user_id: i64) -> String {
    format!("user:{user_id}")
}

pub fn conversation_channel(conversation_id: i64) -> String {
    format!("conversation:{conversation_id}")
}

pub fn network_channel(network_id: i64) -> String {
    format!("network:{network_id}")
}

/// Zero-padded member form so lexicographic order matches numeric order.
pub fn encode_member(id: i64) -> String {
    format!("{id:0width$}", width = MEMBER_WIDTH)
}

pub fn decode_member(raw: &str) -> Result<i64, CacheError> {
    raw.parse()
        .map_err(|_| CacheError::Codec(format!("invalid index member `{raw}`")))
}

/// Hash any hashable value; used to route tasks onto workers.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EntityKind;

    #[test]
    fn keys_follow_namespaces() {
        let container = Container::network_posts(5);
        assert_eq!(index_key(&container), "network:5:posts");
        assert_eq!(index_count_key(&container), "network:5:posts:count");
        assert_eq!(
            record_key(&EntityKey::new(EntityKind::Post, 9)),
            "post:9"
        );
        assert_eq!(watermark_key(3, 7), "seen:3:7");
    }

    #[test]
    fn encoded_members_sort_numerically() {
        let mut raw = vec![encode_member(100), encode_member(9), encode_member(11)];
        raw.sort();
        let decoded: Vec<i64> = raw
            .iter()
            .map(|member| decode_member(member).expect("decode"))
            .collect();
        assert_eq!(decoded, vec![9, 11, 100]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_member("abc"), Err(CacheError::Codec(_))));
    }

    #[test]
    fn hash_value_is_stable_within_process() {
        assert_eq!(hash_value("conversation:1:messages"), hash_value("conversation:1:messages"));
    }
}
