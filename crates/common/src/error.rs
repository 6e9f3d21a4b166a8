//! EDI 统一错误类型定义
//!
//! 全项目共享一个错误类型，区分传输错误（链路问题）与业务错误（文件内容问题）。

use thiserror::Error;

/// EDI 统一错误类型
#[derive(Error, Debug)]
pub enum EdiError {
    /// 资源未找到 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 配置验证错误 (400)
    #[error("配置验证失败: {0}")]
    Validation(String),

    /// 传输错误：认证失败、主机不可达、I/O 超时 (502)
    #[error("传输错误: {0}")]
    Transport(String),

    /// 导入失败：文件内容不合法 (422)
    #[error("导入失败: {0}")]
    Import(String),

    /// 导出失败 (500)
    #[error("导出失败: {0}")]
    Export(String),

    /// 调度器生命周期错误：启动/停止超时、未运行 (409)
    #[error("生命周期错误: {0}")]
    Lifecycle(String),

    /// 数据库错误 (500)
    #[error("数据库错误: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// IO 错误 (500)
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误 (500)
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 其他内部错误 (500)
    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EdiError {
    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 创建传输错误
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// 创建导入错误
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// 创建导出错误
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// 创建生命周期错误
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// 判断是否为传输错误（网关应标记为 UNLINKED）
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// 获取 HTTP 状态码
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Lifecycle(_) => 409,
            Self::Import(_) => 422,
            Self::Transport(_) => 502,
            _ => 500,
        }
    }

    /// 获取 HTTP 状态码（axum 类型）
    #[cfg(feature = "control-plane")]
    pub fn axum_status_code(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::from_u16(self.http_status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// EDI Result 类型别名
pub type Result<T> = std::result::Result<T, EdiError>;

// ============ Axum HTTP 响应支持 ============

#[cfg(feature = "control-plane")]
mod axum_impl {
    use super::*;
    use axum::{
        Json,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    impl IntoResponse for EdiError {
        fn into_response(self) -> Response {
            let status = self.axum_status_code();

            match &self {
                EdiError::NotFound(resource) => {
                    tracing::info!(
                        status = status.as_u16(),
                        resource = %resource,
                        "Resource not found"
                    );
                }
                EdiError::Validation(msg) => {
                    tracing::info!(
                        status = status.as_u16(),
                        validation_error = %msg,
                        "Request validation failed"
                    );
                }
                EdiError::Lifecycle(msg) => {
                    tracing::info!(
                        status = status.as_u16(),
                        lifecycle_error = %msg,
                        "Scheduler lifecycle rejected request"
                    );
                }
                EdiError::Transport(msg) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        transport_error = %msg,
                        "Remote transport failed"
                    );
                }
                EdiError::Import(msg) | EdiError::Export(msg) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        error = %msg,
                        "File exchange failed"
                    );
                }
                EdiError::Database(db_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        error = %db_err,
                        "Database operation failed"
                    );
                }
                EdiError::Io(io_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        io_error = %io_err,
                        "IO operation failed"
                    );
                }
                EdiError::Serialization(json_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        serialization_error = %json_err,
                        "JSON serialization failed"
                    );
                }
                EdiError::Internal(internal_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        internal_error = ?internal_err,
                        "Internal server error"
                    );
                }
            }

            let body = Json(json!({"error": self.to_string()}));
            (status, body).into_response()
        }
    }
}
