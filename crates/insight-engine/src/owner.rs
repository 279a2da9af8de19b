//! 소유자 식별자의 이중 표현 호환.
//!
//! 초기 버전은 태스크 소유자를 리터럴 사용자명 센티널(`"admin"`)로
//! 기록했고, 이후 버전은 계정 UUID를 기록합니다. 저장 데이터를
//! 소급 정규화하는 대신, 조회 시점에 동등한 후보 키 집합을 만들어
//! "any-of" 조건으로 질의합니다. 레거시 호환은 이 함수 한 곳에
//! 격리됩니다.

use uuid::Uuid;

/// 레거시 관리자 사용자명 센티널.
pub const ADMIN_SENTINEL: &str = "admin";

/// 소유자 식별자에 대한 동등 후보 키 집합을 계산합니다.
///
/// 순수 함수이며 결과는 중복 없이 입력 순서가 안정적입니다:
/// - 입력 그대로의 키
/// - UUID로 파싱되면 정규화(소문자, 하이픈) 형태와 하이픈 없는 형태
/// - 관리자 계정 UUID ↔ `"admin"` 센티널 상호 매핑
pub fn owner_candidate_keys(owner_id: &str, admin_account_id: &Uuid) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(4);

    let mut push = |key: String| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    push(owner_id.to_string());

    if let Ok(uuid) = Uuid::parse_str(owner_id) {
        push(uuid.to_string());
        push(uuid.simple().to_string());
        if &uuid == admin_account_id {
            push(ADMIN_SENTINEL.to_string());
        }
    }

    if owner_id == ADMIN_SENTINEL {
        push(admin_account_id.to_string());
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_sentinel_maps_to_account_uuid() {
        let admin_id = Uuid::parse_str("7b6a3c1e-0d9f-4f42-9a2f-3f3b1c2d4e5f").unwrap();
        let keys = owner_candidate_keys("admin", &admin_id);

        assert!(keys.contains(&"admin".to_string()));
        assert!(keys.contains(&admin_id.to_string()));
    }

    #[test]
    fn test_admin_uuid_maps_to_sentinel() {
        let admin_id = Uuid::parse_str("7b6a3c1e-0d9f-4f42-9a2f-3f3b1c2d4e5f").unwrap();
        let keys = owner_candidate_keys(&admin_id.to_string(), &admin_id);

        assert!(keys.contains(&"admin".to_string()));
        assert!(keys.contains(&admin_id.simple().to_string()));
    }

    #[test]
    fn test_plain_uuid_owner_normalized_forms() {
        let admin_id = Uuid::nil();
        let owner = Uuid::parse_str("1C8E7A40-2222-4333-8444-555566667777").unwrap();
        let keys = owner_candidate_keys("1C8E7A40-2222-4333-8444-555566667777", &admin_id);

        // 입력 그대로 + 정규화 형태, admin 매핑 없음
        assert!(keys.contains(&"1C8E7A40-2222-4333-8444-555566667777".to_string()));
        assert!(keys.contains(&owner.to_string()));
        assert!(!keys.contains(&"admin".to_string()));
    }

    #[test]
    fn test_opaque_string_owner_single_key() {
        let keys = owner_candidate_keys("service-account-1", &Uuid::nil());
        assert_eq!(keys, vec!["service-account-1".to_string()]);
    }

    #[test]
    fn test_keys_deduplicated_and_stable() {
        let admin_id = Uuid::nil();
        let keys = owner_candidate_keys(&Uuid::nil().to_string(), &admin_id);

        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys, deduped);
        assert_eq!(keys[0], Uuid::nil().to_string());
    }
}
