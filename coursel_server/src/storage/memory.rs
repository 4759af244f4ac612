//! In-process storage backend.
//!
//! One mutex over the relational maps; every repository operation is a single
//! critical section, so the check-and-mutate paths get the same atomicity the
//! Postgres backend gets from its transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use coursel_core::contracts::{CodeRepository, CourseRepository, RefreshTokenRepository};
use coursel_core::error::{CoreError, SelectionError};
use coursel_core::models::user::{
  CreateUser, User, UserRepository, hashed_password, verify_password, verify_password_dummy,
};
use coursel_core::models::{
  Course, CourseId, Enrollment, RefreshToken, RegistrationCode, ResetCode, UserId,
};
use coursel_core::sha256_hash;

#[derive(Default)]
struct MemoryInner {
  users: HashMap<UserId, User>,
  usernames: HashMap<String, UserId>,
  next_user_id: i64,

  refresh_tokens: HashMap<i64, RefreshToken>,
  refresh_by_hash: HashMap<String, i64>,
  next_token_id: i64,

  registration_codes: HashMap<String, RegistrationCode>,
  reset_codes: HashMap<String, ResetCode>,

  courses: HashMap<CourseId, Course>,
  enrollments: Vec<Enrollment>,
}

#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<MemoryInner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryInner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[async_trait]
impl UserRepository for MemoryStore {
  async fn create(&self, input: &CreateUser) -> Result<User, CoreError> {
    let password_hash = hashed_password(&input.password)?;
    let mut inner = self.lock();

    if inner.usernames.contains_key(&input.username) {
      return Err(CoreError::UsernameTaken(input.username.clone()));
    }

    inner.next_user_id += 1;
    let id = UserId(inner.next_user_id);
    let user = User {
      id,
      username: input.username.clone(),
      password_hash: Some(password_hash),
      role: input.role,
      totp_secret: input.totp_secret.clone(),
      is_active: true,
      tags: input.tags.clone(),
      created_at: Utc::now(),
    };
    inner.usernames.insert(input.username.clone(), id);
    inner.users.insert(id, user.clone());
    Ok(user)
  }

  async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError> {
    Ok(self.lock().users.get(&id).cloned())
  }

  async fn find_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
    let inner = self.lock();
    Ok(
      inner
        .usernames
        .get(username)
        .and_then(|id| inner.users.get(id))
        .cloned(),
    )
  }

  async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, CoreError> {
    let user = {
      let inner = self.lock();
      inner
        .usernames
        .get(username)
        .and_then(|id| inner.users.get(id))
        .cloned()
    };

    match user {
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
    let mut inner = self.lock();
    let user = inner
      .users
      .get_mut(&id)
      .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
    user.totp_secret = secret.map(str::to_string);
    Ok(())
  }

  async fn set_tags(&self, id: UserId, tags: &[String]) -> Result<(), CoreError> {
    let mut inner = self.lock();
    let user = inner
      .users
      .get_mut(&id)
      .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
    user.tags = tags.to_vec();
    Ok(())
  }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
  async fn store(
    &self,
    user_id: UserId,
    raw_token: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError> {
    let mut inner = self.lock();
    inner.next_token_id += 1;
    let id = inner.next_token_id;
    let record = RefreshToken {
      id,
      user_id,
      token_hash: sha256_hash(raw_token),
      issued_at: Utc::now(),
      expires_at,
      revoked: false,
    };
    inner.refresh_by_hash.insert(record.token_hash.clone(), id);
    inner.refresh_tokens.insert(id, record.clone());
    Ok(record)
  }

  async fn find_by_token(&self, raw_token: &str) -> Result<Option<RefreshToken>, CoreError> {
    let hash = sha256_hash(raw_token);
    let inner = self.lock();
    Ok(
      inner
        .refresh_by_hash
        .get(&hash)
        .and_then(|id| inner.refresh_tokens.get(id))
        .cloned(),
    )
  }

  async fn replace(
    &self,
    old_token_id: i64,
    new_raw_token: &str,
    new_expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError> {
    let mut inner = self.lock();
    let old = inner
      .refresh_tokens
      .get_mut(&old_token_id)
      .ok_or_else(|| CoreError::NotFound(format!("refresh token {old_token_id}")))?;
    old.revoked = true;
    let user_id = old.user_id;

    inner.next_token_id += 1;
    let id = inner.next_token_id;
    let record = RefreshToken {
      id,
      user_id,
      token_hash: sha256_hash(new_raw_token),
      issued_at: Utc::now(),
      expires_at: new_expires_at,
      revoked: false,
    };
    inner.refresh_by_hash.insert(record.token_hash.clone(), id);
    inner.refresh_tokens.insert(id, record.clone());
    Ok(record)
  }

  async fn revoke(&self, token_id: i64) -> Result<(), CoreError> {
    let mut inner = self.lock();
    if let Some(record) = inner.refresh_tokens.get_mut(&token_id) {
      record.revoked = true;
    }
    Ok(())
  }

  async fn revoke_all_for_user(&self, user_id: UserId) -> Result<(), CoreError> {
    let mut inner = self.lock();
    for record in inner.refresh_tokens.values_mut() {
      if record.user_id == user_id {
        record.revoked = true;
      }
    }
    Ok(())
  }
}

#[async_trait]
impl CodeRepository for MemoryStore {
  async fn create_registration_code(&self, code: &RegistrationCode) -> Result<(), CoreError> {
    let mut inner = self.lock();
    inner
      .registration_codes
      .insert(code.code.clone(), code.clone());
    Ok(())
  }

  async fn consume_registration_code(&self, code: &str) -> Result<RegistrationCode, CoreError> {
    let mut inner = self.lock();
    let record = inner
      .registration_codes
      .get_mut(code)
      .ok_or_else(|| CoreError::CodeInvalid("unknown registration code".to_string()))?;
    if !record.is_usable(Utc::now()) {
      return Err(CoreError::CodeInvalid(
        "registration code expired or exhausted".to_string(),
      ));
    }
    record.used_count += 1;
    Ok(record.clone())
  }

  async fn create_reset_code(&self, code: &ResetCode) -> Result<(), CoreError> {
    let mut inner = self.lock();
    inner.reset_codes.insert(code.code.clone(), code.clone());
    Ok(())
  }

  async fn consume_reset_code(&self, code: &str, username: &str) -> Result<ResetCode, CoreError> {
    let mut inner = self.lock();
    let record = inner
      .reset_codes
      .get_mut(code)
      .ok_or_else(|| CoreError::CodeInvalid("unknown reset code".to_string()))?;
    if record.username != username || !record.is_usable(Utc::now()) {
      return Err(CoreError::CodeInvalid(
        "reset code expired, used, or not issued for this user".to_string(),
      ));
    }
    record.used = true;
    Ok(record.clone())
  }
}

#[async_trait]
impl CourseRepository for MemoryStore {
  async fn insert_course(&self, course: &Course) -> Result<(), CoreError> {
    if course.capacity <= 0 {
      return Err(CoreError::Validation("capacity must be positive".into()));
    }
    let mut inner = self.lock();
    inner.courses.insert(course.id, course.clone());
    Ok(())
  }

  async fn find_course(&self, id: CourseId) -> Result<Option<Course>, CoreError> {
    Ok(self.lock().courses.get(&id).cloned())
  }

  async fn course_exists(&self, id: CourseId) -> Result<bool, CoreError> {
    Ok(self.lock().courses.contains_key(&id))
  }

  async fn enrollments_for_user(&self, user_id: UserId) -> Result<Vec<Enrollment>, CoreError> {
    Ok(
      self
        .lock()
        .enrollments
        .iter()
        .filter(|e| e.user_id == user_id)
        .cloned()
        .collect(),
    )
  }

  async fn apply_select(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError> {
    let mut inner = self.lock();

    let course = inner
      .courses
      .get(&course_id)
      .ok_or(CoreError::CourseNotFound(course_id.0))?
      .clone();
    let student_tags = inner
      .users
      .get(&user_id)
      .map(|u| u.tags.clone())
      .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;

    if inner
      .enrollments
      .iter()
      .any(|e| e.user_id == user_id && e.course_id == course_id)
    {
      return Err(SelectionError::AlreadyEnrolled.into());
    }
    if course.is_full() {
      return Err(SelectionError::CourseFull.into());
    }
    if !course.admits_tags(&student_tags) {
      return Err(SelectionError::TagIneligible.into());
    }

    let enrolled_course_ids: Vec<CourseId> = inner
      .enrollments
      .iter()
      .filter(|e| e.user_id == user_id)
      .map(|e| e.course_id)
      .collect();
    for other_id in enrolled_course_ids {
      if let Some(other) = inner.courses.get(&other_id) {
        if course.conflicts_with(other) {
          return Err(SelectionError::TimeConflict.into());
        }
      }
    }

    inner.enrollments.push(Enrollment {
      user_id,
      course_id,
      enrolled_at: Utc::now(),
    });
    let course = inner
      .courses
      .get_mut(&course_id)
      .ok_or(CoreError::CourseNotFound(course_id.0))?;
    course.selected_count += 1;
    Ok(())
  }

  async fn apply_deselect(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError> {
    let mut inner = self.lock();

    if !inner.courses.contains_key(&course_id) {
      return Err(CoreError::CourseNotFound(course_id.0));
    }

    let before = inner.enrollments.len();
    inner
      .enrollments
      .retain(|e| !(e.user_id == user_id && e.course_id == course_id));
    if inner.enrollments.len() == before {
      return Err(SelectionError::NotEnrolled.into());
    }

    let course = inner
      .courses
      .get_mut(&course_id)
      .ok_or(CoreError::CourseNotFound(course_id.0))?;
    course.selected_count -= 1;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;
  use chrono::Duration;
  use coursel_core::models::CourseType;
  use coursel_core::models::user::UserRole;

  fn course(id: i64, capacity: i32) -> Course {
    Course {
      id: CourseId(id),
      name: format!("course-{id}"),
      credit: 2,
      course_type: CourseType::Elective,
      teacher_id: None,
      time_begin: 1000,
      time_end: 1130,
      schedule: vec![1, 3],
      location: "A-101".into(),
      capacity,
      selected_count: 0,
      tags: vec![],
    }
  }

  fn student(name: &str) -> CreateUser {
    CreateUser {
      username: name.to_string(),
      password: "hunter4332".to_string(),
      role: UserRole::Student,
      totp_secret: None,
      tags: vec![],
    }
  }

  #[tokio::test]
  async fn duplicate_username_is_rejected() -> Result<()> {
    let store = MemoryStore::new();
    store.create(&student("alice")).await?;
    match store.create(&student("alice")).await {
      Err(CoreError::UsernameTaken(name)) => assert_eq!(name, "alice"),
      other => panic!("expected UsernameTaken, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn authenticate_checks_password() -> Result<()> {
    let store = MemoryStore::new();
    store.create(&student("alice")).await?;

    assert!(store.authenticate("alice", "hunter4332").await?.is_some());
    assert!(store.authenticate("alice", "wrong").await?.is_none());
    assert!(store.authenticate("nobody", "hunter4332").await?.is_none());
    Ok(())
  }

  #[tokio::test]
  async fn select_respects_capacity_and_count_stays_consistent() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_course(&course(1, 1)).await?;
    let a = store.create(&student("a")).await?;
    let b = store.create(&student("b")).await?;

    store.apply_select(a.id, CourseId(1)).await?;
    match store.apply_select(b.id, CourseId(1)).await {
      Err(CoreError::Selection(SelectionError::CourseFull)) => {}
      other => panic!("expected CourseFull, got {other:?}"),
    }

    let c = store.find_course(CourseId(1)).await?.expect("course");
    assert_eq!(c.selected_count, 1);
    Ok(())
  }

  #[tokio::test]
  async fn select_is_idempotent_per_student() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_course(&course(1, 10)).await?;
    let a = store.create(&student("a")).await?;

    store.apply_select(a.id, CourseId(1)).await?;
    match store.apply_select(a.id, CourseId(1)).await {
      Err(CoreError::Selection(SelectionError::AlreadyEnrolled)) => {}
      other => panic!("expected AlreadyEnrolled, got {other:?}"),
    }
    let c = store.find_course(CourseId(1)).await?.expect("course");
    assert_eq!(c.selected_count, 1);
    Ok(())
  }

  #[tokio::test]
  async fn deselect_round_trip_restores_count() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_course(&course(1, 5)).await?;
    let a = store.create(&student("a")).await?;

    store.apply_select(a.id, CourseId(1)).await?;
    store.apply_deselect(a.id, CourseId(1)).await?;
    let c = store.find_course(CourseId(1)).await?.expect("course");
    assert_eq!(c.selected_count, 0);

    match store.apply_deselect(a.id, CourseId(1)).await {
      Err(CoreError::Selection(SelectionError::NotEnrolled)) => {}
      other => panic!("expected NotEnrolled, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn overlapping_schedules_conflict() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_course(&course(1, 5)).await?;
    // Mon/Fri 11:00-12:00 overlaps course 1 on Monday
    let mut y = course(2, 5);
    y.schedule = vec![1, 5];
    y.time_begin = 1100;
    y.time_end = 1200;
    store.insert_course(&y).await?;

    let a = store.create(&student("a")).await?;
    store.apply_select(a.id, CourseId(1)).await?;
    match store.apply_select(a.id, CourseId(2)).await {
      Err(CoreError::Selection(SelectionError::TimeConflict)) => {}
      other => panic!("expected TimeConflict, got {other:?}"),
    }
    let c = store.find_course(CourseId(2)).await?.expect("course");
    assert_eq!(c.selected_count, 0);
    Ok(())
  }

  #[tokio::test]
  async fn tagged_course_requires_shared_tag() -> Result<()> {
    let store = MemoryStore::new();
    let mut c = course(1, 5);
    c.tags = vec!["cs".into()];
    store.insert_course(&c).await?;

    let mut plain = student("plain");
    plain.tags = vec!["bio".into()];
    let plain = store.create(&plain).await?;
    let mut tagged = student("tagged");
    tagged.tags = vec!["cs".into(), "math".into()];
    let tagged = store.create(&tagged).await?;

    match store.apply_select(plain.id, CourseId(1)).await {
      Err(CoreError::Selection(SelectionError::TagIneligible)) => {}
      other => panic!("expected TagIneligible, got {other:?}"),
    }
    store.apply_select(tagged.id, CourseId(1)).await?;
    Ok(())
  }

  #[tokio::test]
  async fn registration_code_consumption_is_bounded() -> Result<()> {
    let store = MemoryStore::new();
    let now = Utc::now();
    let code = RegistrationCode {
      code: "regcode".into(),
      target_role: UserRole::Student,
      max_uses: 2,
      used_count: 0,
      assigned_tags: vec![],
      expires_at: now + Duration::hours(1),
      created_at: now,
    };
    store.create_registration_code(&code).await?;

    store.consume_registration_code("regcode").await?;
    store.consume_registration_code("regcode").await?;
    match store.consume_registration_code("regcode").await {
      Err(CoreError::CodeInvalid(_)) => {}
      other => panic!("expected CodeInvalid, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn refresh_token_rotation_revokes_old() -> Result<()> {
    let store = MemoryStore::new();
    let user = store.create(&student("a")).await?;
    let expires = Utc::now() + Duration::days(7);

    let first = store.store(user.id, "raw-one", expires).await?;
    let second = store.replace(first.id, "raw-two", expires).await?;

    let old = store.find_by_token("raw-one").await?.expect("old record");
    assert!(old.revoked);
    let new = store.find_by_token("raw-two").await?.expect("new record");
    assert!(!new.revoked);
    assert_eq!(new.id, second.id);
    Ok(())
  }
}
