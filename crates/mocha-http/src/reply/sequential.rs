//! Replies served in order, one per request.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Reply, ResponseStub, ResponseWriter};
use crate::error::{MockError, ReplyError};
use crate::mock::BuildContext;
use crate::request::RequestValues;

/// Serves its replies in order. Once exhausted it serves the after-ended
/// reply, or fails the request when none is set.
pub struct SequentialReply {
    replies: Vec<Box<dyn Reply>>,
    after_ended: Option<Box<dyn Reply>>,
    cursor: Mutex<usize>,
}

impl Default for SequentialReply {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialReply {
    pub fn new() -> Self {
        Self {
            replies: Vec::new(),
            after_ended: None,
            cursor: Mutex::new(0),
        }
    }

    pub fn add(mut self, reply: impl Reply + 'static) -> Self {
        self.replies.push(Box::new(reply));
        self
    }

    pub fn after_ended(mut self, reply: impl Reply + 'static) -> Self {
        self.after_ended = Some(Box::new(reply));
        self
    }

    /// Number of requests served so far, fallbacks included.
    pub fn served(&self) -> usize {
        *self.cursor.lock()
    }
}

#[async_trait]
impl Reply for SequentialReply {
    fn prepare(&mut self, ctx: &BuildContext) -> Result<(), MockError> {
        if self.replies.is_empty() {
            return Err(MockError::EmptySequence);
        }
        for reply in self.replies.iter_mut() {
            reply.prepare(ctx)?;
        }
        if let Some(reply) = self.after_ended.as_mut() {
            reply.prepare(ctx)?;
        }
        Ok(())
    }

    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        let index = {
            let mut cursor = self.cursor.lock();
            let index = *cursor;
            *cursor += 1;
            index
        };

        match self.replies.get(index) {
            Some(reply) => reply.build(writer, request).await,
            None => match &self.after_ended {
                Some(reply) => reply.build(writer, request).await,
                None => Err(ReplyError::SequenceExhausted {
                    request: index + 1,
                    size: self.replies.len(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::StaticReply;
    use crate::request::tests::get;
    use hyper::StatusCode;
    use std::sync::Arc;

    async fn next_status(reply: &SequentialReply) -> Result<StatusCode, ReplyError> {
        reply
            .build(&mut ResponseWriter::new(), &get("/"))
            .await
            .map(|stub| stub.map(|s| s.status).unwrap_or(StatusCode::OK))
    }

    #[tokio::test]
    async fn test_exhaustion_without_fallback() {
        let mut reply = SequentialReply::new()
            .add(StaticReply::ok())
            .add(StaticReply::created());
        reply.prepare(&BuildContext::default()).unwrap();

        assert_eq!(next_status(&reply).await.unwrap(), StatusCode::OK);
        assert_eq!(next_status(&reply).await.unwrap(), StatusCode::CREATED);
        let err = next_status(&reply).await.unwrap_err();
        assert!(matches!(
            err,
            ReplyError::SequenceExhausted {
                request: 3,
                size: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_after_ended_repeats_forever() {
        let mut reply = SequentialReply::new()
            .add(StaticReply::ok())
            .after_ended(StaticReply::not_found());
        reply.prepare(&BuildContext::default()).unwrap();

        assert_eq!(next_status(&reply).await.unwrap(), StatusCode::OK);
        for _ in 0..5 {
            assert_eq!(next_status(&reply).await.unwrap(), StatusCode::NOT_FOUND);
        }
        assert_eq!(reply.served(), 6);
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let mut reply = SequentialReply::new();
        assert!(matches!(
            reply.prepare(&BuildContext::default()),
            Err(MockError::EmptySequence)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_each_get_one_slot() {
        let mut builder = SequentialReply::new();
        for status in 200..210u16 {
            builder = builder.add(StaticReply::new(status));
        }
        builder.prepare(&BuildContext::default()).unwrap();
        let reply = Arc::new(builder);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let reply = reply.clone();
            handles.push(tokio::spawn(async move {
                next_status(&reply).await.unwrap().as_u16()
            }));
        }
        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap());
        }
        statuses.sort_unstable();
        assert_eq!(statuses, (200..210).collect::<Vec<u16>>());
        assert!(next_status(&reply).await.is_err());
    }
}
