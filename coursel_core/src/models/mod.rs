pub mod codes;
pub mod course;
pub mod ids;
pub mod jwt;
pub mod task;
pub mod totp;
pub mod user;

pub use codes::{RegistrationCode, ResetCode, generate_code};
pub use course::{Course, CourseType, Enrollment};
pub use ids::{CourseId, TaskId, UserId};
pub use jwt::{AccessClaims, RefreshToken, RefreshTokenData, TokenManager};
pub use task::{FailureKind, QueuedTask, SelectionTask, TaskKind, TaskStatus};
pub use totp::TotpManager;
pub use user::{AuthUser, CreateUser, User, UserRole};
