//! Uniformly random choice between replies.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Reply, ResponseStub, ResponseWriter};
use crate::error::{MockError, ReplyError};
use crate::mock::BuildContext;
use crate::request::RequestValues;

pub struct RandomReply {
    replies: Vec<Box<dyn Reply>>,
    rng: Mutex<StdRng>,
}

impl Default for RandomReply {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomReply {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic selection, mostly useful in tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            replies: Vec::new(),
            rng: Mutex::new(rng),
        }
    }

    pub fn add(mut self, reply: impl Reply + 'static) -> Self {
        self.replies.push(Box::new(reply));
        self
    }
}

#[async_trait]
impl Reply for RandomReply {
    fn prepare(&mut self, ctx: &BuildContext) -> Result<(), MockError> {
        if self.replies.is_empty() {
            return Err(MockError::EmptyRandom);
        }
        for reply in self.replies.iter_mut() {
            reply.prepare(ctx)?;
        }
        Ok(())
    }

    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        let index = self.rng.lock().gen_range(0..self.replies.len().max(1));
        match self.replies.get(index) {
            Some(reply) => reply.build(writer, request).await,
            None => Err(ReplyError::NotPrepared("reply_random")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::StaticReply;
    use crate::request::tests::get;
    use std::collections::HashSet;

    #[test]
    fn test_empty_rejected() {
        let mut reply = RandomReply::new();
        assert!(matches!(
            reply.prepare(&BuildContext::default()),
            Err(MockError::EmptyRandom)
        ));
    }

    #[tokio::test]
    async fn test_selection_covers_all_replies() {
        let mut reply = RandomReply::with_seed(7)
            .add(StaticReply::new(200))
            .add(StaticReply::new(201))
            .add(StaticReply::new(202));
        reply.prepare(&BuildContext::default()).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let stub = reply
                .build(&mut ResponseWriter::new(), &get("/"))
                .await
                .unwrap()
                .unwrap();
            seen.insert(stub.status.as_u16());
        }
        assert_eq!(seen, HashSet::from([200, 201, 202]));
    }

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        async fn statuses(seed: u64) -> Vec<u16> {
            let mut reply = RandomReply::with_seed(seed)
                .add(StaticReply::new(200))
                .add(StaticReply::new(500));
            reply.prepare(&BuildContext::default()).unwrap();
            let mut out = Vec::new();
            for _ in 0..20 {
                let stub = reply
                    .build(&mut ResponseWriter::new(), &get("/"))
                    .await
                    .unwrap()
                    .unwrap();
                out.push(stub.status.as_u16());
            }
            out
        }
        assert_eq!(statuses(42).await, statuses(42).await);
    }
}
