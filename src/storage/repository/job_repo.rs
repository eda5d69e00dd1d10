use crate::storage::entity::pipeline_job::{
    self, ActiveModel as PipelineJobActiveModel, Entity as PipelineJob,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

pub const JOB_QUEUED: &str = "QUEUED";
pub const JOB_CLAIMED: &str = "CLAIMED";
pub const JOB_DONE: &str = "DONE";
pub const JOB_FAILED: &str = "FAILED";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobStats {
    pub total: u64,
    pub queued: u64,
    pub claimed: u64,
    pub done: u64,
    pub failed: u64,
    pub redelivered: u64,
}

pub struct JobRepository;

impl JobRepository {
    /// Inserts a QUEUED job. An identical job still waiting in the queue makes this a no-op
    /// and returns `None`.
    pub async fn enqueue(
        db: &DatabaseConnection,
        request_id: &str,
        stage: &str,
        attempt: i32,
    ) -> Result<Option<i32>, sea_orm::DbErr> {
        let exists = PipelineJob::find()
            .filter(pipeline_job::Column::RequestId.eq(request_id))
            .filter(pipeline_job::Column::Stage.eq(stage))
            .filter(pipeline_job::Column::Attempt.eq(attempt))
            .filter(pipeline_job::Column::Status.eq(JOB_QUEUED))
            .one(db)
            .await?;
        if exists.is_some() {
            return Ok(None);
        }

        let now = Utc::now().timestamp();
        let active_model = PipelineJobActiveModel {
            request_id: Set(request_id.to_string()),
            stage: Set(stage.to_string()),
            attempt: Set(attempt),
            status: Set(JOB_QUEUED.to_string()),
            claimed_by: Set(None),
            claimed_at: Set(None),
            delivery_count: Set(0),
            last_error: Set(None),
            next_run_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let result = active_model.insert(db).await?;
        Ok(Some(result.id))
    }

    /// Atomically claims the oldest runnable job.
    pub async fn claim_next(
        db: &DatabaseConnection,
        worker_id: &str,
        now: i64,
    ) -> Result<Option<pipeline_job::Model>, sea_orm::DbErr> {
        let txn = db.begin().await?;

        let picked = PipelineJob::find()
            .filter(pipeline_job::Column::Status.eq(JOB_QUEUED))
            .filter(pipeline_job::Column::NextRunAt.lte(now))
            .order_by_asc(pipeline_job::Column::CreatedAt)
            .order_by_asc(pipeline_job::Column::Id)
            .one(&txn)
            .await?;

        let Some(job) = picked else {
            txn.commit().await?;
            return Ok(None);
        };

        let job_id = job.id;
        let claimed_at = Utc::now().timestamp();
        let res = PipelineJob::update_many()
            .col_expr(pipeline_job::Column::Status, Expr::value(JOB_CLAIMED))
            .col_expr(
                pipeline_job::Column::ClaimedBy,
                Expr::value(worker_id.to_string()),
            )
            .col_expr(pipeline_job::Column::ClaimedAt, Expr::value(claimed_at))
            .col_expr(pipeline_job::Column::UpdatedAt, Expr::value(claimed_at))
            .filter(pipeline_job::Column::Id.eq(job_id))
            .filter(pipeline_job::Column::Status.eq(JOB_QUEUED))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        if res.rows_affected == 0 {
            return Ok(None);
        }
        PipelineJob::find_by_id(job_id).one(db).await
    }

    pub async fn mark_done(db: &DatabaseConnection, id: i32) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        PipelineJob::update_many()
            .col_expr(pipeline_job::Column::Status, Expr::value(JOB_DONE))
            .col_expr(pipeline_job::Column::UpdatedAt, Expr::value(now))
            .filter(pipeline_job::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(
        db: &DatabaseConnection,
        id: i32,
        message: &str,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        PipelineJob::update_many()
            .col_expr(pipeline_job::Column::Status, Expr::value(JOB_FAILED))
            .col_expr(
                pipeline_job::Column::LastError,
                Expr::value(message.to_string()),
            )
            .col_expr(pipeline_job::Column::UpdatedAt, Expr::value(now))
            .filter(pipeline_job::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Puts CLAIMED jobs whose worker went away back in the queue. Redelivery is what makes
    /// the queue at-least-once; the request lease keeps the stage itself single-flight.
    pub async fn reset_stale_jobs(
        db: &DatabaseConnection,
        claimed_before: i64,
    ) -> Result<u64, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let res = PipelineJob::update_many()
            .col_expr(pipeline_job::Column::Status, Expr::value(JOB_QUEUED))
            .col_expr(
                pipeline_job::Column::DeliveryCount,
                Expr::col(pipeline_job::Column::DeliveryCount).add(1),
            )
            .col_expr(pipeline_job::Column::NextRunAt, Expr::value(now))
            .col_expr(pipeline_job::Column::UpdatedAt, Expr::value(now))
            .filter(pipeline_job::Column::Status.eq(JOB_CLAIMED))
            .filter(pipeline_job::Column::ClaimedAt.lt(claimed_before))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn stats(db: &DatabaseConnection) -> Result<JobStats, sea_orm::DbErr> {
        let total = PipelineJob::find().count(db).await?;
        let queued = PipelineJob::find()
            .filter(pipeline_job::Column::Status.eq(JOB_QUEUED))
            .count(db)
            .await?;
        let claimed = PipelineJob::find()
            .filter(pipeline_job::Column::Status.eq(JOB_CLAIMED))
            .count(db)
            .await?;
        let done = PipelineJob::find()
            .filter(pipeline_job::Column::Status.eq(JOB_DONE))
            .count(db)
            .await?;
        let failed = PipelineJob::find()
            .filter(pipeline_job::Column::Status.eq(JOB_FAILED))
            .count(db)
            .await?;
        let redelivered = PipelineJob::find()
            .filter(pipeline_job::Column::DeliveryCount.gt(0))
            .count(db)
            .await?;

        Ok(JobStats {
            total,
            queued,
            claimed,
            done,
            failed,
            redelivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::establish_connection;

    async fn setup() -> (tempfile::TempDir, DatabaseConnection) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let db = establish_connection(&url).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn enqueue_skips_identical_queued_job() {
        let (_dir, db) = setup().await;
        assert!(JobRepository::enqueue(&db, "r1", "validate", 1).await.unwrap().is_some());
        assert!(JobRepository::enqueue(&db, "r1", "validate", 1).await.unwrap().is_none());
        assert!(JobRepository::enqueue(&db, "r1", "validate", 2).await.unwrap().is_some());
        assert_eq!(JobRepository::stats(&db).await.unwrap().queued, 2);
    }

    #[tokio::test]
    async fn claim_next_is_fifo_and_exclusive() {
        let (_dir, db) = setup().await;
        let first = JobRepository::enqueue(&db, "r1", "generate_script", 1)
            .await
            .unwrap()
            .unwrap();
        JobRepository::enqueue(&db, "r2", "generate_script", 1)
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        let a = JobRepository::claim_next(&db, "w1", now).await.unwrap().unwrap();
        assert_eq!(a.id, first);
        assert_eq!(a.status, JOB_CLAIMED);
        assert_eq!(a.claimed_by.as_deref(), Some("w1"));

        let b = JobRepository::claim_next(&db, "w2", now).await.unwrap().unwrap();
        assert_eq!(b.request_id, "r2");
        assert!(JobRepository::claim_next(&db, "w3", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_claims_are_redelivered() {
        let (_dir, db) = setup().await;
        JobRepository::enqueue(&db, "r1", "execute", 1).await.unwrap();
        let now = Utc::now().timestamp();
        let job = JobRepository::claim_next(&db, "dead", now).await.unwrap().unwrap();

        assert_eq!(JobRepository::reset_stale_jobs(&db, now - 60).await.unwrap(), 0);
        assert_eq!(JobRepository::reset_stale_jobs(&db, now + 1).await.unwrap(), 1);

        let again = JobRepository::claim_next(&db, "alive", now + 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.delivery_count, 1);

        JobRepository::mark_failed(&db, again.id, "boom").await.unwrap();
        let stats = JobRepository::stats(&db).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.redelivered, 1);
    }
}
