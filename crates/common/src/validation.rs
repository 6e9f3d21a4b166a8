//! 网关配置验证模块
//!
//! 提供统一的配置结构校验，供链路校验器和控制平面共享使用。

use crate::models::{GatewayConfig, GatewayKind};

/// 验证错误类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 远程网关缺少主机
    MissingHost,

    /// 端口超出有效范围
    InvalidPort { port: u16 },

    /// 缺少用户名
    MissingUsername,

    /// 导入类网关缺少导入目录
    MissingImportPath { kind: GatewayKind },

    /// 导出类网关缺少导出目录
    MissingExportPath { kind: GatewayKind },

    /// 超时必须大于 0
    InvalidTimeout { timeout_ms: u64 },

    /// 路径不能跳出网关根目录
    PathEscapesRoot { path: String },
}

impl ValidationError {
    /// 获取错误的详细描述
    pub fn description(&self) -> String {
        match self {
            Self::MissingHost => "host is required".to_string(),
            Self::InvalidPort { port } => format!("invalid port {} (must be 1-65535)", port),
            Self::MissingUsername => "username is required".to_string(),
            Self::MissingImportPath { kind } => {
                format!("gateway {} requires an import path", kind)
            }
            Self::MissingExportPath { kind } => {
                format!("gateway {} requires an export path", kind)
            }
            Self::InvalidTimeout { timeout_ms } => {
                format!("invalid timeout {}ms (must be greater than 0)", timeout_ms)
            }
            Self::PathEscapesRoot { path } => format!("path {} escapes gateway root", path),
        }
    }
}

/// 验证上下文
pub struct ValidationContext {
    kind: GatewayKind,
}

impl ValidationContext {
    /// 创建新的验证上下文
    pub fn new(kind: GatewayKind) -> Self {
        Self { kind }
    }

    /// 验证网关配置
    pub fn validate_config(&self, config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.kind.is_remote() {
            if config.host.trim().is_empty() {
                errors.push(ValidationError::MissingHost);
            }
            if config.port == 0 {
                errors.push(ValidationError::InvalidPort { port: config.port });
            }
            if config.username.trim().is_empty() {
                errors.push(ValidationError::MissingUsername);
            }
        }

        if self.kind.imports() && config.import_path.trim().is_empty() {
            errors.push(ValidationError::MissingImportPath { kind: self.kind });
        }
        if !self.kind.imports() && !config.has_export_path() {
            errors.push(ValidationError::MissingExportPath { kind: self.kind });
        }

        if config.timeout_ms == 0 {
            errors.push(ValidationError::InvalidTimeout {
                timeout_ms: config.timeout_ms,
            });
        }

        for path in [&config.import_path, &config.archive_path, &config.export_path] {
            if path.split(['/', '\\']).any(|segment| segment == "..") {
                errors.push(ValidationError::PathEscapesRoot { path: path.clone() });
            }
        }

        errors
    }
}

/// 将错误列表拼接为一条消息
pub fn describe_all(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::description)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sftp_config() -> GatewayConfig {
        GatewayConfig {
            host: "edi.example.com".to_string(),
            username: "wms".to_string(),
            password_enc: Some("pw".to_string()),
            import_path: "/in".to_string(),
            export_path: "/out".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_error_description() {
        let err = ValidationError::InvalidPort { port: 0 };
        assert_eq!(err.description(), "invalid port 0 (must be 1-65535)");

        let err = ValidationError::MissingImportPath {
            kind: GatewayKind::SftpOrders,
        };
        assert_eq!(err.description(), "gateway sftp_orders requires an import path");

        let err = ValidationError::PathEscapesRoot {
            path: "../etc".to_string(),
        };
        assert!(err.description().contains("escapes"));
    }

    #[test]
    fn test_valid_sftp_config() {
        let ctx = ValidationContext::new(GatewayKind::SftpOrders);
        assert!(ctx.validate_config(&make_sftp_config()).is_empty());
    }

    #[test]
    fn test_remote_gateway_requires_host_and_user() {
        let ctx = ValidationContext::new(GatewayKind::SftpOrders);
        let config = GatewayConfig {
            host: String::new(),
            username: String::new(),
            ..make_sftp_config()
        };
        let errors = ctx.validate_config(&config);
        assert!(errors.contains(&ValidationError::MissingHost));
        assert!(errors.contains(&ValidationError::MissingUsername));
    }

    #[test]
    fn test_cloud_folder_needs_no_host() {
        let ctx = ValidationContext::new(GatewayKind::CloudFolder);
        let config = GatewayConfig {
            import_path: "dropbox/import".to_string(),
            ..Default::default()
        };
        assert!(ctx.validate_config(&config).is_empty());
    }

    #[test]
    fn test_export_only_gateway_requires_export_path() {
        let ctx = ValidationContext::new(GatewayKind::SftpWorkInstructions);
        let config = GatewayConfig {
            export_path: String::new(),
            ..make_sftp_config()
        };
        let errors = ctx.validate_config(&config);
        assert_eq!(
            errors,
            vec![ValidationError::MissingExportPath {
                kind: GatewayKind::SftpWorkInstructions
            }]
        );
    }

    #[test]
    fn test_zero_timeout_and_parent_path_rejected() {
        let ctx = ValidationContext::new(GatewayKind::SftpOrders);
        let config = GatewayConfig {
            timeout_ms: 0,
            archive_path: "in/../../etc".to_string(),
            ..make_sftp_config()
        };
        let errors = ctx.validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(describe_all(&errors).contains("; "));
    }
}
