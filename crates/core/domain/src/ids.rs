//! 实例与设备 ID 生成。

use crate::AppKind;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 16;

fn random_suffix() -> String {
    let mut bits = uuid::Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE62[(bits % 62) as usize] as char);
        bits /= 62;
    }
    out
}

/// 生成 `<appCode>@<16位 base62>` 形式的实例 ID。
pub fn new_instance_id(kind: AppKind) -> String {
    format!("{}@{}", kind.code(), random_suffix())
}

/// 生成 `DEV_<16位 base62>` 形式的设备 ID。
pub fn new_device_id() -> String {
    format!("DEV_{}", random_suffix())
}

/// 取出实例 ID 中 `@` 之前的 appCode。
pub fn app_code_of(instance_id: &str) -> Option<&str> {
    match instance_id.split_once('@') {
        Some((code, suffix)) if !code.is_empty() && !suffix.is_empty() => Some(code),
        _ => None,
    }
}
