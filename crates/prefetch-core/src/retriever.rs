use crate::error::PrefetchResult;
use crate::passage::RetrievedPassage;

/// Retrieval interface shared by every prefetched retriever variant.
///
/// Returned lists are never longer than `top_k`, may be shorter, and keep
/// the stored rank order.
pub trait Retriever {
    fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>>;

    fn retrieve_batch(
        &self,
        questions: &[&str],
        top_k: usize,
    ) -> PrefetchResult<Vec<Vec<RetrievedPassage>>> {
        questions
            .iter()
            .map(|q| self.retrieve(q, top_k))
            .collect()
    }
}

impl<R: Retriever + ?Sized> Retriever for &R {
    fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>> {
        (**self).retrieve(question, top_k)
    }

    fn retrieve_batch(
        &self,
        questions: &[&str],
        top_k: usize,
    ) -> PrefetchResult<Vec<Vec<RetrievedPassage>>> {
        (**self).retrieve_batch(questions, top_k)
    }
}
