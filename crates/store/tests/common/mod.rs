#![allow(dead_code)]

use codejudge_store::{
    models::{Difficulty, NewProblem, NewSubmission, NewUser, Problem, Submission, User},
    Database, StoreConfig,
};
use serde_json::json;

pub async fn database() -> Database {
    let db = Database::connect(&StoreConfig::new("sqlite::memory:"))
        .await
        .expect("connect");
    db.run_migrations().await.expect("migrate");
    db
}

pub fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        name: Some("Ada".to_string()),
        password: "$argon2id$hash".to_string(),
        ..Default::default()
    }
}

pub async fn user(db: &Database, email: &str) -> User {
    db.users().create(new_user(email)).await.expect("create user")
}

pub async fn problem(db: &Database, owner: &User, title: &str, difficulty: Difficulty) -> Problem {
    let mut data = NewProblem::new(&owner.id, title, difficulty);
    data.tags = vec!["array".to_string()];
    data.test_cases = json!([{ "input": "1 2", "output": "3" }]);
    db.problems().create(data).await.expect("create problem")
}

pub async fn submission(db: &Database, user: &User, problem: &Problem) -> Submission {
    db.submissions()
        .create(NewSubmission {
            user_id: user.id.clone(),
            problem_id: problem.id.clone(),
            source_code: json!({ "RUST": "fn main() {}" }),
            language: "RUST".to_string(),
            status: "PENDING".to_string(),
            ..Default::default()
        })
        .await
        .expect("create submission")
}
