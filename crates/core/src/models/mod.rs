//! # 数据模型
//!
//! 定义调度集群的持久化记录：守护进程、任务、任务实例、调度、作业图和队列。
//!
//! ## 状态流转
//!
//! ### 守护进程
//! ```text
//! CREATED → RUNNING ⇄ PAUSED
//!              ↓  ↘
//!          STOPPING  SUSPENDED
//!              ↓
//!      ENDED | ERROR | KILLED → HANDLED
//! ```
//!
//! ### 任务实例
//! ```text
//! CREATED → RUNNING → SUCCESS | FAILURE | ERROR | TIMEDOUT | INTERRUPTED
//!    ↓                              ↓
//! ERROR | SUSPENDED             HANDLED
//! ```
//!
//! 所有状态枚举在数据库中以大写字符串存储。

/// 为以大写字符串存储的状态枚举生成 Display、FromStr 与 sqlx 编解码实现
macro_rules! sqlite_text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {s}", stringify!($name))),
                }
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                s.parse::<$name>().map_err(Into::into)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}

mod cron_schedule;
mod daemon;
mod instance;
mod job;
mod queue;
mod schedule;
mod task;

pub use cron_schedule::*;
pub use daemon::*;
pub use instance::*;
pub use job::*;
pub use queue::*;
pub use schedule::*;
pub use task::*;
