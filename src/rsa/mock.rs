//! Hand-rolled review-server test double, mirroring the teacher's own
//! mock-forge pattern: canned responses keyed by query string plus per-
//! operation call counters, all behind interior mutability so the trait's
//! `&self` methods can still mutate state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use crate::error::RsaError;
use crate::model::Change;
use crate::rsa::{QueryPredicate, ReviewServerAdapter};

#[derive(Debug, Default)]
pub struct MockAdapter {
    /// Canned query results, keyed by the Gerrit-syntax query string a real
    /// adapter would have sent.
    responses: RefCell<HashMap<String, Vec<Change>>>,
    /// Per-operation call counts (`"query"`, `"upload"`, `"approve"`, ...).
    calls: RefCell<HashMap<String, u32>>,
    /// If set, `upload` returns no record, exercising the rollback path.
    upload_fails: RefCell<bool>,
    /// Canned comment bodies, keyed by change number.
    comments: RefCell<HashMap<String, Vec<String>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub_query(&self, query: impl Into<String>, changes: Vec<Change>) {
        self.responses.borrow_mut().insert(query.into(), changes);
    }

    pub fn fail_next_upload(&self) {
        *self.upload_fails.borrow_mut() = true;
    }

    pub fn stub_comments(&self, number: impl Into<String>, messages: Vec<String>) {
        self.comments.borrow_mut().insert(number.into(), messages);
    }

    pub fn call_count(&self, operation: &str) -> u32 {
        self.calls.borrow().get(operation).copied().unwrap_or(0)
    }

    fn record(&self, operation: &str) {
        *self.calls.borrow_mut().entry(operation.to_string()).or_insert(0) += 1;
    }
}

impl ReviewServerAdapter for MockAdapter {
    fn query(&self, predicate: &QueryPredicate) -> Result<Vec<Change>> {
        self.record("query");
        let query = predicate.to_gerrit_query();
        Ok(self.responses.borrow().get(&query).cloned().unwrap_or_default())
    }

    fn upload(
        &self,
        _dir: &Path,
        _revision: &str,
        branch: &str,
        topic: &str,
        _reviewers: &[String],
        _publish_as_draft: bool,
    ) -> Result<Change> {
        self.record("upload");
        if *self.upload_fails.borrow() {
            *self.upload_fails.borrow_mut() = false;
            return Err(RsaError::Upload {
                branch: branch.to_string(),
                topic: topic.to_string(),
            }
            .into());
        }
        let query = format!("topic:{topic} AND status:open");
        self.responses
            .borrow()
            .get(&query)
            .and_then(|changes| changes.first().cloned())
            .ok_or_else(|| {
                RsaError::Upload {
                    branch: branch.to_string(),
                    topic: topic.to_string(),
                }
                .into()
            })
    }

    fn approve(&self, _number: &str, _patchset: &str) -> Result<()> {
        self.record("approve");
        Ok(())
    }

    fn reject(&self, _number: &str, _patchset: &str) -> Result<()> {
        self.record("reject");
        Ok(())
    }

    fn submit(&self, _number: &str, _patchset: &str) -> Result<()> {
        self.record("submit");
        Ok(())
    }

    fn comment(&self, _number: &str, _patchset: &str, _text: &str, _verified: Option<i32>, _code_review: Option<i32>) -> Result<()> {
        self.record("comment");
        Ok(())
    }

    fn abandon(&self, _number: &str, _patchset: &str) -> Result<()> {
        self.record("abandon");
        Ok(())
    }

    fn list_comments(&self, number: &str) -> Result<Vec<String>> {
        self.record("list_comments");
        Ok(self.comments.borrow().get(number).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use std::collections::HashMap as Map;

    fn sample_change(topic: &str) -> Change {
        Change {
            id: topic.to_string(),
            branch: "master".into(),
            revision: "a".repeat(40),
            parent: "b".repeat(40),
            project_name: "proj".into(),
            number: Some("1".into()),
            patchset_number: Some("1".into()),
            patchset_revision: Some("a".repeat(40)),
            status: Status::Present,
            subject: "s".into(),
            topic: Some(topic.to_string()),
            url: None,
            approvals: Map::new(),
            merge_commit: None,
        }
    }

    #[test]
    fn stubbed_comments_are_returned_and_counted() {
        let mock = MockAdapter::new();
        mock.stub_comments("42", vec!["looks fine".to_string(), "DISCARD".to_string()]);
        let comments = mock.list_comments("42").unwrap();
        assert_eq!(comments, vec!["looks fine".to_string(), "DISCARD".to_string()]);
        assert_eq!(mock.call_count("list_comments"), 1);
        assert!(mock.list_comments("99").unwrap().is_empty());
    }

    #[test]
    fn stubbed_query_is_returned_and_counted() {
        let mock = MockAdapter::new();
        mock.stub_query("project:proj AND topic:I1 AND status:open", vec![sample_change("I1")]);
        let predicate = QueryPredicate::by_topic("proj", "I1");
        let results = mock.query(&predicate).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(mock.call_count("query"), 1);
    }

    #[test]
    fn upload_failure_is_reported_once_then_recovers() {
        let mock = MockAdapter::new();
        mock.fail_next_upload();
        mock.stub_query("topic:I1 AND status:open", vec![sample_change("I1")]);
        let dir = std::path::Path::new(".");
        assert!(mock.upload(dir, "rev", "recomb-original-master-rev", "I1", &[], false).is_err());
        let result = mock.upload(dir, "rev", "recomb-original-master-rev", "I1", &[], false);
        assert!(result.is_ok());
        assert_eq!(mock.call_count("upload"), 2);
    }
}
