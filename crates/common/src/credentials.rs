//! 网关密码解密
//!
//! 静态加密由外部负责，这里只定义连接时解密的接口。

use anyhow::Result;

/// 连接建立时解密已存储的网关密码
pub trait CredentialCipher: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<String>;
}

/// 直通实现：存储值即明文（本地开发、测试）
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl CredentialCipher for PlaintextCipher {
    fn decrypt(&self, encrypted: &str) -> Result<String> {
        Ok(encrypted.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_cipher_is_identity() {
        assert_eq!(PlaintextCipher.decrypt("s3cret").unwrap(), "s3cret");
    }
}
