use crate::backtest::status::BacktestStatus;
use crate::storage::entity::backtest_request::{
    self, ActiveModel as BacktestRequestActiveModel, Entity as BacktestRequest,
};
use crate::storage::repository::RepoError;
use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Iterable,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Value,
};
use serde::{Deserialize, Serialize};

/// Number of `(attempt, error)` pairs kept on the row.
pub const MAX_ATTEMPT_HISTORY: usize = 10;
const MAX_HISTORY_ERROR_CHARS: usize = 2000;

#[derive(Clone, Debug)]
pub struct NewBacktestRequest {
    pub owner_id: String,
    pub instrument_symbol: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub strategy_description: String,
    pub strategy_title: String,
}

/// Optional flag writes that ride along with a status transition.
#[derive(Clone, Debug, Default)]
pub struct StatusUpdate {
    pub error_message: Option<String>,
    pub ready_for_report: Option<bool>,
    pub generated_report: Option<bool>,
    pub release_lease: bool,
}

impl StatusUpdate {
    pub fn release() -> Self {
        Self {
            release_lease: true,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            release_lease: true,
            ..Default::default()
        }
    }
}

/// Artifact URL fields; `None` means "keep the stored value".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtifactUrls {
    pub script_url: Option<String>,
    pub validation_data_url: Option<String>,
    pub full_data_url: Option<String>,
    pub log_url: Option<String>,
    pub report_url: Option<String>,
    pub preview_image_url: Option<String>,
}

impl ArtifactUrls {
    pub fn is_empty(&self) -> bool {
        self.script_url.is_none()
            && self.validation_data_url.is_none()
            && self.full_data_url.is_none()
            && self.log_url.is_none()
            && self.report_url.is_none()
            && self.preview_image_url.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: String,
    pub at: i64,
}

pub fn attempt_history(model: &backtest_request::Model) -> Vec<AttemptRecord> {
    model
        .attempt_history
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn null_string() -> SimpleExpr {
    Expr::value(Value::String(None))
}

fn null_bigint() -> SimpleExpr {
    Expr::value(Value::BigInt(None))
}

pub struct BacktestRequestRepository;

impl BacktestRequestRepository {
    pub async fn create(
        db: &DatabaseConnection,
        new: NewBacktestRequest,
    ) -> Result<backtest_request::Model, RepoError> {
        let now = Utc::now().timestamp();
        let active_model = BacktestRequestActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            owner_id: Set(new.owner_id),
            instrument_symbol: Set(new.instrument_symbol),
            from_date: Set(new.from_date),
            to_date: Set(new.to_date),
            strategy_description: Set(new.strategy_description),
            strategy_title: Set(Some(new.strategy_title)),
            status: Set(BacktestStatus::Pending),
            error_message: Set(None),
            ready_for_report: Set(false),
            generated_report: Set(false),
            script_url: Set(None),
            validation_data_url: Set(None),
            full_data_url: Set(None),
            log_url: Set(None),
            report_url: Set(None),
            preview_image_url: Set(None),
            share_id: Set(None),
            is_public: Set(false),
            validation_attempts: Set(0),
            attempt_history: Set(None),
            version: Set(0),
            lease_token: Set(None),
            leased_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active_model.insert(db).await?)
    }

    pub async fn get_by_id(
        db: &DatabaseConnection,
        id: &str,
    ) -> Result<backtest_request::Model, RepoError> {
        BacktestRequest::find_by_id(id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    pub async fn list_by_owner(
        db: &DatabaseConnection,
        owner_id: &str,
    ) -> Result<Vec<backtest_request::Model>, RepoError> {
        Ok(BacktestRequest::find()
            .filter(backtest_request::Column::OwnerId.eq(owner_id))
            .order_by_desc(backtest_request::Column::CreatedAt)
            .all(db)
            .await?)
    }

    /// Single-flight entry into a stage. Takes the lease only if the row is still at
    /// `expected` and nobody else holds it; `None` means the job is stale or a duplicate.
    pub async fn claim(
        db: &DatabaseConnection,
        id: &str,
        expected: BacktestStatus,
        lease_token: &str,
    ) -> Result<Option<backtest_request::Model>, RepoError> {
        let now = Utc::now().timestamp();
        let res = BacktestRequest::update_many()
            .col_expr(
                backtest_request::Column::LeaseToken,
                Expr::value(lease_token.to_string()),
            )
            .col_expr(backtest_request::Column::LeasedAt, Expr::value(now))
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now))
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::Status.eq(expected.to_value()))
            .filter(backtest_request::Column::LeaseToken.is_null())
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(Self::get_by_id(db, id).await?))
    }

    /// Moves `from -> to` under the caller's lease. The edge must exist and failure
    /// states need a non-empty message.
    pub async fn transition(
        db: &DatabaseConnection,
        id: &str,
        lease_token: &str,
        from: BacktestStatus,
        to: BacktestStatus,
        update: StatusUpdate,
    ) -> Result<backtest_request::Model, RepoError> {
        check_edge(from, to, update.error_message.as_deref())?;

        let now = Utc::now().timestamp();
        let mut q = BacktestRequest::update_many()
            .col_expr(backtest_request::Column::Status, Expr::value(to.to_value()))
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now));

        if let Some(msg) = update.error_message {
            q = q.col_expr(backtest_request::Column::ErrorMessage, Expr::value(msg));
        }
        if let Some(v) = update.ready_for_report {
            q = q.col_expr(backtest_request::Column::ReadyForReport, Expr::value(v));
        }
        if let Some(v) = update.generated_report {
            q = q.col_expr(backtest_request::Column::GeneratedReport, Expr::value(v));
        }
        if update.release_lease {
            q = q
                .col_expr(backtest_request::Column::LeaseToken, null_string())
                .col_expr(backtest_request::Column::LeasedAt, null_bigint());
        }

        let res = q
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::Status.eq(from.to_value()))
            .filter(backtest_request::Column::LeaseToken.eq(lease_token))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Err(RepoError::StaleState {
                id: id.to_string(),
                expected: from,
            });
        }
        Self::get_by_id(db, id).await
    }

    /// Supervisor path: no lease is required, the observed `version` fences the write.
    /// Always clears any lease left on the row.
    pub async fn force_transition(
        db: &DatabaseConnection,
        id: &str,
        expected_version: i32,
        from: BacktestStatus,
        to: BacktestStatus,
        message: &str,
    ) -> Result<backtest_request::Model, RepoError> {
        check_edge(from, to, Some(message))?;

        let now = Utc::now().timestamp();
        let res = BacktestRequest::update_many()
            .col_expr(backtest_request::Column::Status, Expr::value(to.to_value()))
            .col_expr(
                backtest_request::Column::ErrorMessage,
                Expr::value(message.to_string()),
            )
            .col_expr(backtest_request::Column::LeaseToken, null_string())
            .col_expr(backtest_request::Column::LeasedAt, null_bigint())
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now))
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::Status.eq(from.to_value()))
            .filter(backtest_request::Column::Version.eq(expected_version))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Err(RepoError::StaleState {
                id: id.to_string(),
                expected: from,
            });
        }
        Self::get_by_id(db, id).await
    }

    /// Coalesce write: only `Some` fields change, a `None` never clears a stored URL.
    pub async fn update_artifact_urls(
        db: &DatabaseConnection,
        id: &str,
        urls: ArtifactUrls,
    ) -> Result<backtest_request::Model, RepoError> {
        if urls.is_empty() {
            return Self::get_by_id(db, id).await;
        }

        let now = Utc::now().timestamp();
        let mut q = BacktestRequest::update_many()
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now));

        let fields = [
            (backtest_request::Column::ScriptUrl, urls.script_url),
            (backtest_request::Column::ValidationDataUrl, urls.validation_data_url),
            (backtest_request::Column::FullDataUrl, urls.full_data_url),
            (backtest_request::Column::LogUrl, urls.log_url),
            (backtest_request::Column::ReportUrl, urls.report_url),
            (backtest_request::Column::PreviewImageUrl, urls.preview_image_url),
        ];
        for (col, value) in fields {
            if let Some(v) = value {
                q = q.col_expr(col, Expr::value(v));
            }
        }

        let res = q
            .filter(backtest_request::Column::Id.eq(id))
            .exec(db)
            .await?;
        if res.rows_affected == 0 {
            return Err(RepoError::NotFound(id.to_string()));
        }
        Self::get_by_id(db, id).await
    }

    /// Persists the validation attempt counter and appends to the bounded history.
    pub async fn record_validation_attempt(
        db: &DatabaseConnection,
        id: &str,
        lease_token: &str,
        attempt: u32,
        error: &str,
    ) -> Result<backtest_request::Model, RepoError> {
        let current = Self::get_by_id(db, id).await?;
        let mut history = attempt_history(&current);
        let now = Utc::now().timestamp();
        history.push(AttemptRecord {
            attempt,
            error: error.chars().take(MAX_HISTORY_ERROR_CHARS).collect(),
            at: now,
        });
        if history.len() > MAX_ATTEMPT_HISTORY {
            let drop = history.len() - MAX_ATTEMPT_HISTORY;
            history.drain(..drop);
        }
        let history_json = serde_json::to_string(&history)?;

        let res = BacktestRequest::update_many()
            .col_expr(
                backtest_request::Column::ValidationAttempts,
                Expr::value(attempt as i32),
            )
            .col_expr(
                backtest_request::Column::AttemptHistory,
                Expr::value(history_json),
            )
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now))
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::LeaseToken.eq(lease_token))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Err(RepoError::StaleState {
                id: id.to_string(),
                expected: current.status,
            });
        }
        Self::get_by_id(db, id).await
    }

    pub async fn release_lease(
        db: &DatabaseConnection,
        id: &str,
        lease_token: &str,
    ) -> Result<bool, RepoError> {
        let now = Utc::now().timestamp();
        let res = BacktestRequest::update_many()
            .col_expr(backtest_request::Column::LeaseToken, null_string())
            .col_expr(backtest_request::Column::LeasedAt, null_bigint())
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now))
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::LeaseToken.eq(lease_token))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Clears a lease without a status change, fenced by `version`. Used for rows stuck in a
    /// status that has no failure edge.
    pub async fn force_release(
        db: &DatabaseConnection,
        id: &str,
        expected_version: i32,
    ) -> Result<bool, RepoError> {
        let now = Utc::now().timestamp();
        let res = BacktestRequest::update_many()
            .col_expr(backtest_request::Column::LeaseToken, null_string())
            .col_expr(backtest_request::Column::LeasedAt, null_bigint())
            .col_expr(
                backtest_request::Column::Version,
                Expr::col(backtest_request::Column::Version).add(1),
            )
            .col_expr(backtest_request::Column::UpdatedAt, Expr::value(now))
            .filter(backtest_request::Column::Id.eq(id))
            .filter(backtest_request::Column::Version.eq(expected_version))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Leased non-terminal requests whose lease was taken before `leased_before`.
    pub async fn find_leased_before(
        db: &DatabaseConnection,
        leased_before: i64,
    ) -> Result<Vec<backtest_request::Model>, RepoError> {
        Ok(BacktestRequest::find()
            .filter(backtest_request::Column::LeaseToken.is_not_null())
            .filter(backtest_request::Column::LeasedAt.lt(leased_before))
            .order_by_asc(backtest_request::Column::LeasedAt)
            .all(db)
            .await?)
    }

    /// Non-terminal requests not touched since `updated_before`.
    pub async fn find_stale(
        db: &DatabaseConnection,
        updated_before: i64,
    ) -> Result<Vec<backtest_request::Model>, RepoError> {
        let terminal: Vec<String> = BacktestStatus::iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.to_value())
            .collect();
        Ok(BacktestRequest::find()
            .filter(backtest_request::Column::Status.is_not_in(terminal))
            .filter(backtest_request::Column::UpdatedAt.lt(updated_before))
            .order_by_asc(backtest_request::Column::UpdatedAt)
            .all(db)
            .await?)
    }

    pub async fn status_counts(
        db: &DatabaseConnection,
    ) -> Result<Vec<(BacktestStatus, u64)>, RepoError> {
        let mut out = Vec::new();
        for status in BacktestStatus::iter() {
            let n = BacktestRequest::find()
                .filter(backtest_request::Column::Status.eq(status.to_value()))
                .count(db)
                .await?;
            if n > 0 {
                out.push((status, n));
            }
        }
        Ok(out)
    }
}

fn check_edge(
    from: BacktestStatus,
    to: BacktestStatus,
    message: Option<&str>,
) -> Result<(), RepoError> {
    if !from.can_transition_to(to) {
        return Err(RepoError::InvalidTransition { from, to });
    }
    if to.is_failure() && message.map(str::trim).unwrap_or_default().is_empty() {
        return Err(RepoError::MissingErrorMessage(to));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::establish_connection;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, DatabaseConnection) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("repo.db").display());
        let db = establish_connection(&url).await.unwrap();
        (dir, db)
    }

    fn sample() -> NewBacktestRequest {
        NewBacktestRequest {
            owner_id: "user-1".into(),
            instrument_symbol: "NIFTY".into(),
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            strategy_description: "buy when the 5 day sma crosses the 20 day sma".into(),
            strategy_title: "SMA Crossover".into(),
        }
    }

    #[tokio::test]
    async fn create_starts_pending_without_lease() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        assert_eq!(m.status, BacktestStatus::Pending);
        assert_eq!(m.version, 0);
        assert!(m.lease_token.is_none());
        assert_eq!(m.strategy_title.as_deref(), Some("SMA Crossover"));

        let listed = BacktestRequestRepository::list_by_owner(&db, "user-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(matches!(
            BacktestRequestRepository::get_by_id(&db, "missing").await,
            Err(RepoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn artifact_urls_coalesce_and_are_idempotent() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();

        let urls = ArtifactUrls {
            script_url: Some("file:///a/script.py".into()),
            ..Default::default()
        };
        let a = BacktestRequestRepository::update_artifact_urls(&db, &m.id, urls.clone())
            .await
            .unwrap();
        let b = BacktestRequestRepository::update_artifact_urls(&db, &m.id, urls)
            .await
            .unwrap();
        assert_eq!(a.script_url, b.script_url);

        let c = BacktestRequestRepository::update_artifact_urls(
            &db,
            &m.id,
            ArtifactUrls {
                log_url: Some("file:///a/backtest.log".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(c.script_url.as_deref(), Some("file:///a/script.py"));
        assert_eq!(c.log_url.as_deref(), Some("file:///a/backtest.log"));

        let d = BacktestRequestRepository::update_artifact_urls(&db, &m.id, ArtifactUrls::default())
            .await
            .unwrap();
        assert_eq!(d.script_url, c.script_url);
        assert_eq!(d.log_url, c.log_url);
    }

    #[tokio::test]
    async fn claim_is_single_flight() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();

        let first = BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "a")
            .await
            .unwrap();
        assert!(first.is_some());
        let second = BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "b")
            .await
            .unwrap();
        assert!(second.is_none());

        let wrong_status =
            BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Validating, "c")
                .await
                .unwrap();
        assert!(wrong_status.is_none());
    }

    #[tokio::test]
    async fn transition_requires_lease_and_edge() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "lease")
            .await
            .unwrap()
            .unwrap();

        let err = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "lease",
            BacktestStatus::Pending,
            BacktestStatus::Executing,
            StatusUpdate::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::InvalidTransition { .. }));

        let err = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "other",
            BacktestStatus::Pending,
            BacktestStatus::GeneratingScript,
            StatusUpdate::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::StaleState { .. }));

        let moved = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "lease",
            BacktestStatus::Pending,
            BacktestStatus::GeneratingScript,
            StatusUpdate::default(),
        )
        .await
        .unwrap();
        assert_eq!(moved.status, BacktestStatus::GeneratingScript);
        assert_eq!(moved.lease_token.as_deref(), Some("lease"));
        assert!(moved.version > m.version);
    }

    #[tokio::test]
    async fn failure_needs_message() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "l")
            .await
            .unwrap();
        BacktestRequestRepository::transition(
            &db,
            &m.id,
            "l",
            BacktestStatus::Pending,
            BacktestStatus::GeneratingScript,
            StatusUpdate::default(),
        )
        .await
        .unwrap();

        let err = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "l",
            BacktestStatus::GeneratingScript,
            BacktestStatus::Failed,
            StatusUpdate::failure("   "),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::MissingErrorMessage(BacktestStatus::Failed)));

        let failed = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "l",
            BacktestStatus::GeneratingScript,
            BacktestStatus::Failed,
            StatusUpdate::failure("no script"),
        )
        .await
        .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("no script"));
        assert!(failed.lease_token.is_none());
    }

    #[tokio::test]
    async fn attempt_history_is_bounded() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "l")
            .await
            .unwrap();

        let mut last = None;
        for attempt in 1..=12u32 {
            last = Some(
                BacktestRequestRepository::record_validation_attempt(
                    &db,
                    &m.id,
                    "l",
                    attempt,
                    &format!("error {attempt}"),
                )
                .await
                .unwrap(),
            );
        }
        let last = last.unwrap();
        assert_eq!(last.validation_attempts, 12);
        let history = attempt_history(&last);
        assert_eq!(history.len(), MAX_ATTEMPT_HISTORY);
        assert_eq!(history[0].attempt, 3);
        assert_eq!(history.last().unwrap().error, "error 12");

        let err = BacktestRequestRepository::record_validation_attempt(&db, &m.id, "x", 13, "e")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::StaleState { .. }));
    }

    #[tokio::test]
    async fn force_transition_is_fenced_by_version() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        let claimed = BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "l")
            .await
            .unwrap()
            .unwrap();
        let moved = BacktestRequestRepository::transition(
            &db,
            &m.id,
            "l",
            BacktestStatus::Pending,
            BacktestStatus::GeneratingScript,
            StatusUpdate::default(),
        )
        .await
        .unwrap();

        let err = BacktestRequestRepository::force_transition(
            &db,
            &m.id,
            claimed.version,
            BacktestStatus::GeneratingScript,
            BacktestStatus::Failed,
            "budget",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::StaleState { .. }));

        let forced = BacktestRequestRepository::force_transition(
            &db,
            &m.id,
            moved.version,
            BacktestStatus::GeneratingScript,
            BacktestStatus::Failed,
            "budget",
        )
        .await
        .unwrap();
        assert_eq!(forced.status, BacktestStatus::Failed);
        assert!(forced.lease_token.is_none());
    }

    #[tokio::test]
    async fn find_stale_skips_terminal_rows() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        let future = Utc::now().timestamp() + 10;
        let stale = BacktestRequestRepository::find_stale(&db, future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, m.id);

        let past = Utc::now().timestamp() - 1000;
        assert!(BacktestRequestRepository::find_stale(&db, past)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn leased_rows_can_be_found_and_force_released() {
        let (_dir, db) = setup().await;
        let m = BacktestRequestRepository::create(&db, sample()).await.unwrap();
        let claimed = BacktestRequestRepository::claim(&db, &m.id, BacktestStatus::Pending, "l1")
            .await
            .unwrap()
            .unwrap();

        let future = Utc::now().timestamp() + 10;
        let leased = BacktestRequestRepository::find_leased_before(&db, future)
            .await
            .unwrap();
        assert_eq!(leased.len(), 1);

        assert!(!BacktestRequestRepository::force_release(&db, &m.id, claimed.version - 1)
            .await
            .unwrap());
        assert!(BacktestRequestRepository::force_release(&db, &m.id, claimed.version)
            .await
            .unwrap());

        let after = BacktestRequestRepository::get_by_id(&db, &m.id).await.unwrap();
        assert_eq!(after.status, BacktestStatus::Pending);
        assert!(after.lease_token.is_none());
        assert!(BacktestRequestRepository::find_leased_before(&db, future)
            .await
            .unwrap()
            .is_empty());
    }
}
