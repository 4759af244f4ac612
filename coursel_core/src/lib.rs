pub mod contracts;
pub mod error;
pub mod middlewares;
pub mod models;

// Re-export core types and traits
pub use contracts::{
  CodeRepository, CourseRepository, RefreshTokenRepository, Storage, UserRepository,
};
pub use error::{CoreError, ErrorMapper, SelectionError, TokenValidationError};
pub use middlewares::{TokenVerifier, verify_token_middleware};
pub use models::{
  AccessClaims,
  AuthUser,
  Course,
  CourseId,
  CourseType,
  CreateUser,
  Enrollment,
  FailureKind,
  QueuedTask,
  RefreshToken,
  RefreshTokenData,
  RegistrationCode,
  ResetCode,
  SelectionTask,
  TaskId,
  TaskKind,
  TaskStatus,
  TokenManager,
  TotpManager,
  User,
  UserId,
  UserRole,
  generate_code,
};

// Re-export JWT helpers and constants
pub use models::jwt;
pub use models::jwt::{
  ACCESS_TOKEN_EXPIRATION, REFRESH_TOKEN_EXPIRATION, TokenConfigProvider, generate_refresh_token,
  sha256_hash,
};
pub use models::task::{DESELECT_PRIORITY, SELECT_PRIORITY};
