//! Postgres storage backend.
//!
//! Runtime-bound sqlx queries; `apply_select`/`apply_deselect` lock the
//! course row with `SELECT ... FOR UPDATE` so the capacity check and the
//! count update commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use coursel_core::contracts::{CodeRepository, CourseRepository, RefreshTokenRepository};
use coursel_core::error::{CoreError, SelectionError};
use coursel_core::models::user::{
  CreateUser, User, UserRepository, hashed_password, verify_password, verify_password_dummy,
};
use coursel_core::models::{
  Course, CourseId, Enrollment, RefreshToken, RegistrationCode, ResetCode, UserId,
};
use coursel_core::sha256_hash;

pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub async fn connect(db_url: &str) -> Result<Self, CoreError> {
    let pool = PgPoolOptions::new()
      .max_connections(16)
      .connect(db_url)
      .await?;
    sqlx::migrate!("./migrations")
      .run(&pool)
      .await
      .map_err(|e| CoreError::Database(e.to_string()))?;
    Ok(Self { pool })
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

const USER_COLUMNS: &str = "id, username, password_hash, role, totp_secret, is_active, tags, created_at";

#[async_trait]
impl UserRepository for PgStore {
  async fn create(&self, input: &CreateUser) -> Result<User, CoreError> {
    let password_hash = hashed_password(&input.password)?;

    let user = sqlx::query_as::<_, User>(
      r#"
      INSERT INTO users (username, password_hash, role, totp_secret, tags)
      VALUES ($1, $2, $3, $4, $5)
      RETURNING id, username, password_hash, role, totp_secret, is_active, tags, created_at
      "#,
    )
    .bind(&input.username)
    .bind(&password_hash)
    .bind(input.role)
    .bind(&input.totp_secret)
    .bind(&input.tags)
    .fetch_one(&self.pool)
    .await
    .map_err(|e| match &e {
      sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
        CoreError::UsernameTaken(input.username.clone())
      }
      _ => CoreError::from(e),
    })?;

    Ok(user)
  }

  async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError> {
    let user = sqlx::query_as::<_, User>(&format!(
      "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(user)
  }

  async fn find_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
    let user = sqlx::query_as::<_, User>(&format!(
      "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(&self.pool)
    .await?;
    Ok(user)
  }

  async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, CoreError> {
    match self.find_by_username(username).await? {
      Some(user) => {
        let hash = user.password_hash.as_deref().unwrap_or_default();
        if verify_password(password, hash)? {
          Ok(Some(user))
        } else {
          Ok(None)
        }
      }
      None => {
        verify_password_dummy(password);
        Ok(None)
      }
    }
  }

  async fn set_totp_secret(&self, id: UserId, secret: Option<&str>) -> Result<(), CoreError> {
    let result = sqlx::query("UPDATE users SET totp_secret = $2 WHERE id = $1")
      .bind(id)
      .bind(secret)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(CoreError::NotFound(format!("user {id}")));
    }
    Ok(())
  }

  async fn set_tags(&self, id: UserId, tags: &[String]) -> Result<(), CoreError> {
    let result = sqlx::query("UPDATE users SET tags = $2 WHERE id = $1")
      .bind(id)
      .bind(tags)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(CoreError::NotFound(format!("user {id}")));
    }
    Ok(())
  }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
  async fn store(
    &self,
    user_id: UserId,
    raw_token: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError> {
    let record = sqlx::query_as::<_, RefreshToken>(
      r#"
      INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
      VALUES ($1, $2, $3)
      RETURNING id, user_id, token_hash, issued_at, expires_at, revoked
      "#,
    )
    .bind(user_id)
    .bind(sha256_hash(raw_token))
    .bind(expires_at)
    .fetch_one(&self.pool)
    .await?;
    Ok(record)
  }

  async fn find_by_token(&self, raw_token: &str) -> Result<Option<RefreshToken>, CoreError> {
    let record = sqlx::query_as::<_, RefreshToken>(
      r#"
      SELECT id, user_id, token_hash, issued_at, expires_at, revoked
      FROM refresh_tokens
      WHERE token_hash = $1
      "#,
    )
    .bind(sha256_hash(raw_token))
    .fetch_optional(&self.pool)
    .await?;
    Ok(record)
  }

  async fn replace(
    &self,
    old_token_id: i64,
    new_raw_token: &str,
    new_expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError> {
    let mut tx = self.pool.begin().await?;

    let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1")
      .bind(old_token_id)
      .execute(&mut *tx)
      .await?;
    if result.rows_affected() == 0 {
      return Err(CoreError::NotFound(format!(
        "refresh token {old_token_id}"
      )));
    }

    let record = sqlx::query_as::<_, RefreshToken>(
      r#"
      INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
      SELECT user_id, $2, $3 FROM refresh_tokens WHERE id = $1
      RETURNING id, user_id, token_hash, issued_at, expires_at, revoked
      "#,
    )
    .bind(old_token_id)
    .bind(sha256_hash(new_raw_token))
    .bind(new_expires_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(record)
  }

  async fn revoke(&self, token_id: i64) -> Result<(), CoreError> {
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1")
      .bind(token_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn revoke_all_for_user(&self, user_id: UserId) -> Result<(), CoreError> {
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1")
      .bind(user_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[async_trait]
impl CodeRepository for PgStore {
  async fn create_registration_code(&self, code: &RegistrationCode) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO registration_codes (code, target_role, max_uses, used_count, assigned_tags, expires_at)
      VALUES ($1, $2, $3, $4, $5, $6)
      "#,
    )
    .bind(&code.code)
    .bind(code.target_role)
    .bind(code.max_uses)
    .bind(code.used_count)
    .bind(&code.assigned_tags)
    .bind(code.expires_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn consume_registration_code(&self, code: &str) -> Result<RegistrationCode, CoreError> {
    // Single guarded update: the WHERE clause rejects exhausted and expired
    // codes, so concurrent consumers cannot push used_count past max_uses.
    let record = sqlx::query_as::<_, RegistrationCode>(
      r#"
      UPDATE registration_codes
      SET used_count = used_count + 1
      WHERE code = $1 AND used_count < max_uses AND expires_at > NOW()
      RETURNING code, target_role, max_uses, used_count, assigned_tags, expires_at, created_at
      "#,
    )
    .bind(code)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| {
      CoreError::CodeInvalid("registration code unknown, expired, or exhausted".to_string())
    })?;
    Ok(record)
  }

  async fn create_reset_code(&self, code: &ResetCode) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO reset_codes (code, username, used, expires_at)
      VALUES ($1, $2, $3, $4)
      "#,
    )
    .bind(&code.code)
    .bind(&code.username)
    .bind(code.used)
    .bind(code.expires_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn consume_reset_code(&self, code: &str, username: &str) -> Result<ResetCode, CoreError> {
    let record = sqlx::query_as::<_, ResetCode>(
      r#"
      UPDATE reset_codes
      SET used = TRUE
      WHERE code = $1 AND username = $2 AND used = FALSE AND expires_at > NOW()
      RETURNING code, username, used, expires_at, created_at
      "#,
    )
    .bind(code)
    .bind(username)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| {
      CoreError::CodeInvalid("reset code unknown, used, expired, or not for this user".to_string())
    })?;
    Ok(record)
  }
}

const COURSE_COLUMNS: &str = "id, name, credit, course_type, teacher_id, time_begin, time_end, schedule, location, capacity, selected_count, tags";

#[async_trait]
impl CourseRepository for PgStore {
  async fn insert_course(&self, course: &Course) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO courses (id, name, credit, course_type, teacher_id, time_begin, time_end,
                           schedule, location, capacity, selected_count, tags)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
      "#,
    )
    .bind(course.id)
    .bind(&course.name)
    .bind(course.credit)
    .bind(course.course_type)
    .bind(course.teacher_id)
    .bind(course.time_begin)
    .bind(course.time_end)
    .bind(&course.schedule)
    .bind(&course.location)
    .bind(course.capacity)
    .bind(course.selected_count)
    .bind(&course.tags)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn find_course(&self, id: CourseId) -> Result<Option<Course>, CoreError> {
    let course = sqlx::query_as::<_, Course>(&format!(
      "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(course)
  }

  async fn course_exists(&self, id: CourseId) -> Result<bool, CoreError> {
    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM courses WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(exists.is_some())
  }

  async fn enrollments_for_user(&self, user_id: UserId) -> Result<Vec<Enrollment>, CoreError> {
    let rows = sqlx::query_as::<_, Enrollment>(
      "SELECT user_id, course_id, enrolled_at FROM enrollments WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn apply_select(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError> {
    let mut tx = self.pool.begin().await?;

    let course = sqlx::query_as::<_, Course>(&format!(
      "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1 FOR UPDATE"
    ))
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CoreError::CourseNotFound(course_id.0))?;

    let student_tags: Vec<String> = sqlx::query_scalar("SELECT tags FROM users WHERE id = $1")
      .bind(user_id)
      .fetch_optional(&mut *tx)
      .await?
      .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;

    let already: Option<i32> = sqlx::query_scalar(
      "SELECT 1 FROM enrollments WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?;
    if already.is_some() {
      return Err(SelectionError::AlreadyEnrolled.into());
    }

    if course.is_full() {
      return Err(SelectionError::CourseFull.into());
    }
    if !course.admits_tags(&student_tags) {
      return Err(SelectionError::TagIneligible.into());
    }

    let enrolled = sqlx::query_as::<_, Course>(&format!(
      r#"
      SELECT {COURSE_COLUMNS} FROM courses
      WHERE id IN (SELECT course_id FROM enrollments WHERE user_id = $1)
      "#
    ))
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;
    if enrolled.iter().any(|other| course.conflicts_with(other)) {
      return Err(SelectionError::TimeConflict.into());
    }

    sqlx::query("INSERT INTO enrollments (user_id, course_id) VALUES ($1, $2)")
      .bind(user_id)
      .bind(course_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("UPDATE courses SET selected_count = selected_count + 1 WHERE id = $1")
      .bind(course_id)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(())
  }

  async fn apply_deselect(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError> {
    let mut tx = self.pool.begin().await?;

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM courses WHERE id = $1 FOR UPDATE")
      .bind(course_id)
      .fetch_optional(&mut *tx)
      .await?;
    if exists.is_none() {
      return Err(CoreError::CourseNotFound(course_id.0));
    }

    let removed = sqlx::query("DELETE FROM enrollments WHERE user_id = $1 AND course_id = $2")
      .bind(user_id)
      .bind(course_id)
      .execute(&mut *tx)
      .await?;
    if removed.rows_affected() == 0 {
      return Err(SelectionError::NotEnrolled.into());
    }

    sqlx::query("UPDATE courses SET selected_count = selected_count - 1 WHERE id = $1")
      .bind(course_id)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(())
  }
}
