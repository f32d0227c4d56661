//! Protocol account construction.
//!
//! Translates the abstract user records pushed by the panel into the
//! concrete per-protocol accounts the engine stores in its inbound user
//! registries.

use serde::{Deserialize, Serialize};

/// Shadowsocks cipher suite. `Unknown` is kept as an explicit value so an
/// unrecognized string degrades to a rejectable account instead of a parse
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CipherType {
    Unknown,
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    Xchacha20Poly1305,
    None,
}

impl CipherType {
    /// Parse a cipher name. Accepts both the kebab-case wire spellings and
    /// the SCREAMING_SNAKE_CASE enum spellings the panel may send.
    pub fn parse(s: &str) -> Self {
        match s {
            "aes-128-gcm" | "AES_128_GCM" => Self::Aes128Gcm,
            "aes-256-gcm" | "AES_256_GCM" => Self::Aes256Gcm,
            "chacha20-poly1305" | "chacha20-ietf-poly1305" | "CHACHA20_POLY1305" => {
                Self::Chacha20Poly1305
            }
            "xchacha20-poly1305" | "xchacha20-ietf-poly1305" | "XCHACHA20_POLY1305" => {
                Self::Xchacha20Poly1305
            }
            "none" | "NONE" => Self::None,
            _ => Self::Unknown,
        }
    }
}

/// Protocol-specific secret material of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Vless {
        uuid: String,
        /// Flow control string, e.g. "xtls-rprx-vision". May be empty.
        flow: String,
    },
    Trojan {
        password: String,
    },
    Shadowsocks {
        password: String,
        cipher: CipherType,
        /// Replay-attack protection.
        iv_check: bool,
    },
}

/// A user as the engine sees it: an identity label plus one protocol
/// account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineUser {
    /// Engine-visible identity, used for removal and stats attribution.
    pub label: String,
    pub account: Account,
}

/// Panel-supplied user record carrying material for every protocol; the
/// inbound's protocol type selects which subset is used.
#[derive(Debug, Clone, Default)]
pub struct UserData {
    pub user_id: String,
    /// Identifier tracked by the fingerprint mirror, distinct from the
    /// protocol credentials.
    pub hash_uuid: String,
    pub vless_uuid: String,
    pub trojan_password: String,
    pub ss_password: String,
}

/// Protocol-specific shape of a single inbound.
#[derive(Debug, Clone, Default)]
pub struct InboundProfile {
    /// "vless", "trojan" or "shadowsocks"; anything else is unsupported.
    pub protocol: String,
    pub tag: String,
    pub flow: String,
    pub cipher: Option<CipherType>,
    pub iv_check: bool,
}

pub fn build_vless_user(label: &str, uuid: &str, flow: &str) -> EngineUser {
    EngineUser {
        label: label.to_owned(),
        account: Account::Vless {
            uuid: uuid.to_owned(),
            flow: flow.to_owned(),
        },
    }
}

pub fn build_trojan_user(label: &str, password: &str) -> EngineUser {
    EngineUser {
        label: label.to_owned(),
        account: Account::Trojan {
            password: password.to_owned(),
        },
    }
}

pub fn build_shadowsocks_user(
    label: &str,
    password: &str,
    cipher: CipherType,
    iv_check: bool,
) -> EngineUser {
    EngineUser {
        label: label.to_owned(),
        account: Account::Shadowsocks {
            password: password.to_owned(),
            cipher,
            iv_check,
        },
    }
}

/// Build the account for `user` matching the inbound's protocol.
///
/// Returns `None` for a protocol this node does not know, which the caller
/// treats as an unsupported-but-recoverable combination; new protocol types
/// from a newer panel must not crash an older node.
pub fn build_user_for_inbound(inbound: &InboundProfile, user: &UserData) -> Option<EngineUser> {
    match inbound.protocol.as_str() {
        "vless" => Some(build_vless_user(&user.user_id, &user.vless_uuid, &inbound.flow)),
        "trojan" => Some(build_trojan_user(&user.user_id, &user.trojan_password)),
        "shadowsocks" => Some(build_shadowsocks_user(
            &user.user_id,
            &user.ss_password,
            inbound.cipher.unwrap_or(CipherType::Unknown),
            inbound.iv_check,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vless_account_carries_uuid_and_flow() {
        let user = build_vless_user("alice", "uuid-1", "xtls-rprx-vision");
        assert_eq!(user.label, "alice");
        assert_eq!(
            user.account,
            Account::Vless {
                uuid: "uuid-1".into(),
                flow: "xtls-rprx-vision".into()
            }
        );
    }

    #[test]
    fn vless_flow_may_be_empty() {
        let user = build_vless_user("alice", "uuid-1", "");
        let Account::Vless { flow, .. } = &user.account else {
            panic!("expected vless account");
        };
        assert!(flow.is_empty());
    }

    #[test]
    fn trojan_account_carries_password() {
        let user = build_trojan_user("bob", "secret");
        assert_eq!(user.account, Account::Trojan { password: "secret".into() });
    }

    #[test]
    fn shadowsocks_account_carries_cipher_and_iv_check() {
        let user = build_shadowsocks_user("carol", "pw", CipherType::Aes256Gcm, true);
        assert_eq!(
            user.account,
            Account::Shadowsocks {
                password: "pw".into(),
                cipher: CipherType::Aes256Gcm,
                iv_check: true
            }
        );
    }

    #[test]
    fn build_for_inbound_selects_protocol_material() {
        let user = UserData {
            user_id: "dave".into(),
            vless_uuid: "uuid-v".into(),
            trojan_password: "pw-t".into(),
            ss_password: "pw-s".into(),
            ..Default::default()
        };

        let vless = InboundProfile {
            protocol: "vless".into(),
            tag: "vless-in".into(),
            flow: "xtls-rprx-vision".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_user_for_inbound(&vless, &user).unwrap().account,
            Account::Vless { ref uuid, .. } if uuid == "uuid-v"
        ));

        let trojan = InboundProfile {
            protocol: "trojan".into(),
            tag: "trojan-in".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_user_for_inbound(&trojan, &user).unwrap().account,
            Account::Trojan { ref password } if password == "pw-t"
        ));

        let ss = InboundProfile {
            protocol: "shadowsocks".into(),
            tag: "ss-in".into(),
            cipher: Some(CipherType::Chacha20Poly1305),
            iv_check: true,
            ..Default::default()
        };
        assert!(matches!(
            build_user_for_inbound(&ss, &user).unwrap().account,
            Account::Shadowsocks { cipher: CipherType::Chacha20Poly1305, iv_check: true, .. }
        ));
    }

    #[test]
    fn unknown_protocol_yields_no_account() {
        let inbound = InboundProfile {
            protocol: "vmess".into(),
            tag: "vmess-in".into(),
            ..Default::default()
        };
        assert!(build_user_for_inbound(&inbound, &UserData::default()).is_none());
    }

    #[test]
    fn cipher_parsing_accepts_both_spellings() {
        assert_eq!(CipherType::parse("aes-128-gcm"), CipherType::Aes128Gcm);
        assert_eq!(CipherType::parse("AES_128_GCM"), CipherType::Aes128Gcm);
        assert_eq!(CipherType::parse("aes-256-gcm"), CipherType::Aes256Gcm);
        assert_eq!(CipherType::parse("chacha20-ietf-poly1305"), CipherType::Chacha20Poly1305);
        assert_eq!(CipherType::parse("XCHACHA20_POLY1305"), CipherType::Xchacha20Poly1305);
        assert_eq!(CipherType::parse("none"), CipherType::None);
        assert_eq!(CipherType::parse("rc4-md5"), CipherType::Unknown);
        assert_eq!(CipherType::parse(""), CipherType::Unknown);
    }
}
