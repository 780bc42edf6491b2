//! # sl_workbook - SheetLink Workbook Codec
//!
//! 外部二进制工作簿的读写: 读取时优先使用约定名称的工作表，写回时从内存数据集重建单个工作表。

pub mod decode;
pub mod encode;

use sha2::{Digest, Sha256};

pub use decode::{decode, DecodedWorkbook};
pub use encode::encode;

/// 内容指纹 (SHA-256 十六进制)
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
        assert_eq!(fingerprint(b"").len(), 64);
    }
}
