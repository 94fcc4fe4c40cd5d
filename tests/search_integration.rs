use quarry::{
    AnalyzerConfig, BufferConfig, Document, FieldOptions, Index, IndexConfig, QuarryError, Schema,
};

fn schema() -> Schema {
    Schema::builder()
        .add_text_field("title", FieldOptions::TEXT_STORED)
        .add_text_field("body", FieldOptions::TEXT_STORED)
        .build()
        .unwrap()
}

fn index_with(bodies: &[&str], config: IndexConfig) -> Index {
    let index = Index::create_in_ram(schema(), config);
    {
        let mut writer = index.writer().unwrap();
        for body in bodies {
            writer
                .add_document(Document::new().with_field("body", *body))
                .unwrap();
        }
        writer.commit().unwrap();
    }
    index
}

fn index_of(bodies: &[&str]) -> Index {
    index_with(bodies, IndexConfig::default())
}

fn ids(index: &Index, query: &str) -> Vec<u64> {
    index
        .search(query, "body", 100)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.doc_id)
        .collect()
}

fn sorted_ids(index: &Index, query: &str) -> Vec<u64> {
    let mut ids = ids(index, query);
    ids.sort_unstable();
    ids
}

#[test]
fn test_quick_fox_lazy_dog() {
    let index = index_of(&["the quick fox", "the lazy dog"]);

    assert_eq!(ids(&index, "quick"), vec![0]);
    assert_eq!(ids(&index, "dog"), vec![1]);
    // Equal scores fall back to ascending document id
    assert_eq!(ids(&index, "the"), vec![0, 1]);
    assert!(ids(&index, "cat").is_empty());
}

#[test]
fn test_fuzzy_query_matches_transposition() {
    let index = index_of(&["the quick fox", "the lazy dog"]);

    assert_eq!(ids(&index, "quikc~2"), vec![0]);
    assert_eq!(ids(&index, "quikc~1"), vec![0]);
    assert!(ids(&index, "qxxck~1").is_empty());
}

#[test]
fn test_deleted_documents_are_excluded() {
    let index = index_of(&["the quick fox", "the lazy dog"]);

    assert!(index.delete(0).unwrap());
    // Not visible until committed
    assert_eq!(sorted_ids(&index, "the"), vec![0, 1]);

    index.commit().unwrap();
    assert_eq!(ids(&index, "the"), vec![1]);
    assert!(ids(&index, "quick").is_empty());
    assert_eq!(index.num_docs(), 1);
    assert!(matches!(
        index.searcher().doc(0),
        Err(QuarryError::DocumentNotFound(0))
    ));
}

#[test]
fn test_empty_query_and_empty_index() {
    let index = Index::create_in_ram(schema(), IndexConfig::default());

    assert!(matches!(
        index.search("", "body", 10),
        Err(QuarryError::QuerySyntax(_))
    ));
    assert!(matches!(
        index.search("   ", "body", 10),
        Err(QuarryError::QuerySyntax(_))
    ));

    let response = index.search("anything", "body", 10).unwrap();
    assert!(response.hits.is_empty());
    assert_eq!(response.total_hits, 0);
    assert_eq!(response.generation, 0);
}

#[test]
fn test_phrase_requires_adjacency() {
    let index = index_of(&[
        "quick brown fox",
        "brown quick fox",
        "quick red brown fox",
    ]);

    assert_eq!(ids(&index, "\"quick brown\""), vec![0]);
    assert_eq!(ids(&index, "\"brown fox\""), vec![0, 2]);
    assert_eq!(sorted_ids(&index, "quick AND brown"), vec![0, 1, 2]);
}

#[test]
fn test_operator_precedence() {
    let index = index_of(&["alpha", "beta", "beta gamma", "gamma"]);

    // AND binds tighter than OR
    assert_eq!(sorted_ids(&index, "alpha OR beta AND gamma"), vec![0, 2]);
    assert_eq!(sorted_ids(&index, "(alpha OR beta) AND gamma"), vec![2]);
    assert_eq!(sorted_ids(&index, "beta AND NOT gamma"), vec![1]);
    assert_eq!(sorted_ids(&index, "NOT beta"), vec![0, 3]);
    assert_eq!(sorted_ids(&index, "alpha gamma"), vec![0, 2, 3]);
}

#[test]
fn test_field_prefix_and_boost() {
    let index = Index::create_in_ram(schema(), IndexConfig::default());
    {
        let mut writer = index.writer().unwrap();
        writer
            .add_document(
                Document::new()
                    .with_field("title", "rust")
                    .with_field("body", "systems programming"),
            )
            .unwrap();
        writer
            .add_document(
                Document::new()
                    .with_field("title", "python")
                    .with_field("body", "rust programming"),
            )
            .unwrap();
        writer.commit().unwrap();
    }

    assert_eq!(ids(&index, "title:rust"), vec![0]);
    assert_eq!(ids(&index, "rust"), vec![1]);
    assert_eq!(sorted_ids(&index, "title:rust OR rust"), vec![0, 1]);
    assert_eq!(ids(&index, "title:rust^10 OR rust")[0], 0);
    assert_eq!(ids(&index, "title:rust OR rust^10")[0], 1);

    assert!(matches!(
        index.search("author:someone", "body", 10),
        Err(QuarryError::InvalidRequest(_))
    ));
}

#[test]
fn test_ranking_prefers_term_frequency() {
    let index = index_of(&[
        "rust programming language",
        "rust rust rust programming",
        "garden tools",
    ]);

    assert_eq!(ids(&index, "rust"), vec![1, 0]);
    let response = index.search("rust", "body", 10).unwrap();
    assert!(response.hits[0].score > response.hits[1].score);
    assert!(response.hits.iter().all(|h| h.score > 0.0));
}

#[test]
fn test_limit_and_total_hits() {
    let index = index_of(&["fox one", "fox two", "fox three"]);

    let response = index.search("fox", "body", 2).unwrap();
    assert_eq!(response.hits.len(), 2);
    assert_eq!(response.total_hits, 3);
    assert_eq!(response.hits[0].fields.get("body"), Some("fox one"));

    assert!(index.search("fox", "body", 0).unwrap().hits.is_empty());
}

#[test]
fn test_scores_do_not_depend_on_segmentation() {
    let bodies = [
        "the quick brown fox",
        "the lazy dog",
        "quick quick thinking",
        "a fox and a dog",
        "nothing relevant here",
    ];
    let single = index_of(&bodies);
    let split = index_with(
        &bodies,
        IndexConfig::default()
            .with_buffer(BufferConfig::new(1, 1 << 20))
            .with_merge_on_commit(false),
    );
    assert_eq!(split.snapshot().segments().len(), bodies.len());

    for query in ["quick", "fox OR dog", "\"lazy dog\"", "quick AND NOT fox", "quikc~1"] {
        let a = single.search(query, "body", 10).unwrap().hits;
        let b = split.search(query, "body", 10).unwrap().hits;
        assert_eq!(a.len(), b.len(), "{}", query);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.doc_id, y.doc_id, "{}", query);
            assert!((x.score - y.score).abs() < 1e-5, "{}", query);
        }
    }
}

#[test]
fn test_cjk_field_is_segmented() {
    let schema = Schema::builder()
        .add_analyzed_field("body", FieldOptions::TEXT_STORED, AnalyzerConfig::cjk())
        .build()
        .unwrap();
    let index = Index::create_in_ram(schema, IndexConfig::default());
    index
        .add_document(Document::new().with_field("body", "我来到北京清华大学"))
        .unwrap();
    index
        .add_document(Document::new().with_field("body", "他来到了网易杭研大厦"))
        .unwrap();
    index.commit().unwrap();

    assert_eq!(ids(&index, "北京"), vec![0]);
    assert_eq!(sorted_ids(&index, "来到"), vec![0, 1]);
    assert!(ids(&index, "上海").is_empty());
}

#[test]
fn test_highlighting_search_results() {
    let index = index_of(&[
        "one two three four five six seven quick fox eight nine",
        "the lazy dog sleeps all day",
    ]);
    let searcher = index.searcher();
    let tree = quarry::parse("quick OR fox", "body").unwrap();
    let hits = searcher.search(&tree, 10).unwrap();
    assert_eq!(hits.len(), 1);

    let highlighter = searcher
        .highlighter("body")
        .unwrap()
        .with_tags("<b><font color='red'>", "</font></b>");
    let fragments = searcher
        .highlight_hits(&hits, &tree, "body", 4, &highlighter)
        .unwrap();
    assert_eq!(
        fragments,
        vec!["six seven <b><font color='red'>quick</font></b> <b><font color='red'>fox</font></b>"]
    );
}
