use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexWriter};

/// Smallest writer budget tantivy accepts for a single indexing thread.
const WRITER_MEMORY_BYTES: usize = 15_000_000;

/// BM25 scores for `documents` against `query`, computed over a throwaway
/// in-memory tantivy index of just those documents.
///
/// The returned vector is parallel with `documents`; documents that share no
/// term with the query score 0.0. Query syntax errors are tolerated (lenient
/// parsing), so arbitrary user text is safe to pass.
pub fn score_documents(query: &str, documents: &[&str]) -> Result<Vec<f32>> {
    let mut scores = vec![0.0f32; documents.len()];
    if documents.is_empty() || query.trim().is_empty() {
        return Ok(scores);
    }

    let mut schema_builder = Schema::builder();
    let f_slot = schema_builder.add_u64_field("slot", STORED);
    let f_content = schema_builder.add_text_field("content", TEXT);
    let schema = schema_builder.build();

    let index = Index::create_in_ram(schema);
    let mut writer: IndexWriter = index
        .writer_with_num_threads(1, WRITER_MEMORY_BYTES)
        .context("Failed to create index writer")?;

    for (slot, content) in documents.iter().enumerate() {
        writer.add_document(doc!(
            f_slot => slot as u64,
            f_content => content.to_string(),
        ))?;
    }
    writer.commit().context("Failed to commit lexical index")?;

    let reader = index.reader().context("Failed to create reader")?;
    let searcher = reader.searcher();

    let query_parser = QueryParser::for_index(&index, vec![f_content]);
    let (parsed, errors) = query_parser.parse_query_lenient(query);
    if !errors.is_empty() {
        tracing::debug!("Lenient parse dropped {} query fragment(s)", errors.len());
    }

    let top_docs = searcher
        .search(&parsed, &TopDocs::with_limit(documents.len()))
        .context("Lexical search failed")?;

    for (score, doc_address) in top_docs {
        let doc: TantivyDocument = searcher
            .doc(doc_address)
            .context("Failed to retrieve document")?;
        if let Some(slot) = doc.get_first(f_slot).and_then(|v| v.as_u64()) {
            if let Some(s) = scores.get_mut(slot as usize) {
                *s = score;
            }
        }
    }

    Ok(scores)
}

/// Scale scores into [0, 1] by the maximum. All-zero input stays all-zero.
pub fn normalize(scores: &[f32]) -> Vec<f32> {
    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores
        .iter()
        .map(|s| if s.is_finite() { (s / max).clamp(0.0, 1.0) } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_document_scores_higher() {
        let docs = [
            "How to build a sales funnel in GoHighLevel",
            "Setting up calendar booking widgets",
            "Funnel step templates and funnel analytics",
        ];
        let scores = score_documents("funnel", &docs).unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[1], 0.0);
        assert!(scores[0] > 0.0);
        // Two occurrences beat one
        assert!(scores[2] > scores[0]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(score_documents("anything", &[]).unwrap().is_empty());
        assert_eq!(score_documents("   ", &["text"]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_query_syntax_is_tolerated() {
        let docs = ["workflow triggers for sms"];
        let scores = score_documents("workflow AND (sms OR \"unterminated", &docs).unwrap();
        assert_eq!(scores.len(), 1);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[0.0, 2.0, 4.0]), vec![0.0, 0.5, 1.0]);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }
}
