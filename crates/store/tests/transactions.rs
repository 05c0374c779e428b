mod common;

use std::time::Duration;

use codejudge_store::{
    models::{
        Difficulty, NewProblem, NewProblemSolved, NewSubmission, NewTestCaseResult,
        ProblemSolvedKey, TestCaseResult, User, UserKey,
    },
    step, BatchOutput, Error, Filter, Include, IsolationLevel, OrderBy, TxOptions,
};
use serde_json::json;

#[tokio::test]
async fn committed_writes_are_visible() {
    let db = common::database().await;

    let (user, problem) = db
        .transaction(|tx| {
            Box::pin(async move {
                let user = tx.users().create(common::new_user("a@x.com")).await?;
                let problem = tx
                    .problems()
                    .create(NewProblem::new(&user.id, "Two Sum", Difficulty::Easy))
                    .await?;
                // Reads inside the transaction see its own writes.
                let seen = tx.problems().count(None).await?;
                assert_eq!(seen, 1);
                Ok((user, problem))
            })
        })
        .await
        .unwrap();

    assert_eq!(
        db.users()
            .find_unique_or_throw(UserKey::Id(user.id.clone()))
            .await
            .unwrap(),
        user
    );
    assert_eq!(
        db.problems().find_unique(problem.id.clone()).await.unwrap(),
        Some(problem)
    );
}

#[tokio::test]
async fn failed_callback_rolls_back() {
    let db = common::database().await;

    let result: Result<(), Error> = db
        .transaction(|tx| {
            Box::pin(async move {
                tx.users().create(common::new_user("a@x.com")).await?;
                Err(Error::Validation("boom".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(Error::Validation(ref message)) if message == "boom"));
    assert_eq!(db.users().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn constraint_failure_rolls_back_earlier_writes() {
    let db = common::database().await;

    let result: Result<User, Error> = db
        .transaction(|tx| {
            Box::pin(async move {
                tx.users().create(common::new_user("a@x.com")).await?;
                tx.users().create(common::new_user("a@x.com")).await
            })
        })
        .await;

    assert!(matches!(result, Err(Error::UniqueViolation { .. })));
    assert_eq!(db.users().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn slow_callback_expires() {
    let db = common::database().await;
    let options = TxOptions::default().timeout(Duration::from_millis(50));

    let result = db
        .transaction_with(options, |tx| {
            Box::pin(async move {
                tx.users().create(common::new_user("a@x.com")).await?;
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::TransactionExpired(_)), "{err:?}");
    assert_eq!(err.code(), "transaction_expired");
    assert_eq!(db.users().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn busy_database_fails_to_start_within_max_wait() {
    let db = common::database().await;

    let holder = db.transaction(|tx| {
        Box::pin(async move {
            tx.users().create(common::new_user("a@x.com")).await?;
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        })
    });
    let waiter = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        db.transaction_with(
            TxOptions::default().max_wait(Duration::from_millis(50)),
            |tx| Box::pin(async move { tx.users().count(None).await }),
        )
        .await
    };

    let (held, waited) = tokio::join!(holder, waiter);
    held.unwrap();
    let err = waited.unwrap_err();
    assert!(matches!(err, Error::TransactionStart(_)), "{err:?}");
    assert_eq!(db.users().count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn every_isolation_level_is_accepted() {
    let db = common::database().await;
    for level in [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ] {
        let count = db
            .transaction_with(TxOptions::default().isolation_level(level), |tx| {
                Box::pin(async move { tx.users().count(None).await })
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}

#[tokio::test]
async fn batch_returns_outputs_in_order() {
    let db = common::database().await;

    let outputs = db
        .batch(vec![
            step(|tx| {
                Box::pin(async move {
                    let mut data = common::new_user("a@x.com");
                    data.id = Some("u1".into());
                    Ok(BatchOutput::record(tx.users().create(data).await?))
                })
            }),
            step(|tx| {
                Box::pin(async move {
                    let problem = tx
                        .problems()
                        .create(NewProblem::new("u1", "Two Sum", Difficulty::Easy))
                        .await?;
                    Ok(BatchOutput::record(problem))
                })
            }),
            step(|tx| Box::pin(async move { Ok(tx.problems().count(None).await?.into()) })),
            step(|tx| {
                Box::pin(async move {
                    let removed = tx
                        .token_blacklist()
                        .delete_many(Filter::all([]))
                        .await?;
                    Ok(removed.into())
                })
            }),
        ])
        .await
        .unwrap();

    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[0].as_record::<User>().map(|u| u.id.as_str()), Some("u1"));
    assert!(outputs[1].as_record::<User>().is_none());
    assert_eq!(outputs[2].as_count(), Some(1));
    assert_eq!(outputs[3].as_count(), Some(0));

    let json = serde_json::to_value(&outputs).unwrap();
    assert_eq!(json[1]["title"], "Two Sum");
    assert_eq!(json[3], json!({ "count": 0 }));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let db = common::database().await;

    let err = db
        .batch(vec![
            step(|tx| {
                Box::pin(async move {
                    Ok(BatchOutput::record(
                        tx.users().create(common::new_user("a@x.com")).await?,
                    ))
                })
            }),
            step(|tx| {
                Box::pin(async move {
                    Ok(BatchOutput::record(
                        tx.users().create(common::new_user("a@x.com")).await?,
                    ))
                })
            }),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UniqueViolation { .. }));
    assert_eq!(db.users().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn judged_submission_is_recorded_atomically() {
    let db = common::database().await;
    let user = common::user(&db, "a@x.com").await;
    let problem = common::problem(&db, &user, "Two Sum", Difficulty::Easy).await;

    let (user_id, problem_id) = (user.id.clone(), problem.id.clone());
    let submission = db
        .transaction(|tx| {
            Box::pin(async move {
                let submission = tx
                    .submissions()
                    .create(NewSubmission {
                        user_id: user_id.clone(),
                        problem_id: problem_id.clone(),
                        source_code: json!({ "RUST": "fn main() {}" }),
                        language: "RUST".into(),
                        status: "Accepted".into(),
                        ..Default::default()
                    })
                    .await?;
                let results = (0..3)
                    .map(|test_case| NewTestCaseResult {
                        submission_id: submission.id.clone(),
                        test_case,
                        passed: true,
                        stdout: Some("3".into()),
                        expected: "3".into(),
                        status: "Accepted".into(),
                        ..Default::default()
                    })
                    .collect();
                tx.test_case_results().create_many(results, false).await?;
                tx.problems_solved()
                    .upsert(
                        ProblemSolvedKey::UserProblem {
                            user_id: user_id.clone(),
                            problem_id: problem_id.clone(),
                        },
                        NewProblemSolved {
                            user_id,
                            problem_id,
                            ..Default::default()
                        },
                        Default::default(),
                    )
                    .await?;
                Ok(submission)
            })
        })
        .await
        .unwrap();

    let loaded = db
        .submissions()
        .find_unique_including(
            submission.id.clone(),
            vec![Include::new("test_case_results").order_by(OrderBy::asc("test_case"))],
        )
        .await
        .unwrap()
        .expect("submission");
    let cases: Vec<i32> = loaded
        .many::<TestCaseResult>("test_case_results")
        .iter()
        .map(|r| r.test_case)
        .collect();
    assert_eq!(cases, [0, 1, 2]);
    assert_eq!(db.problems_solved().count(None).await.unwrap(), 1);
}
