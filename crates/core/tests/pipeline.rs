use rag_index_core::{
    build_corpus, load_snapshot, CharacterNgramEmbedder, ChunkingConfig, Embedder,
    PipelineConfig, RetrievalError, Retriever, VectorIndex,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CORPUS: &[(&str, &str)] = &[
    (
        "1.txt",
        "Chapter 1: The Boy Who Lived\n\nMr and Mrs Dursley of number four Privet Drive were \
         proud to say that they were perfectly normal.[1]\n\nReferences\nRowling 1997",
    ),
    (
        "2.txt",
        "Quidditch is a sport played on broomsticks. Each team has seven players.\n\n\
         The Golden Snitch ends the game when it is caught by a Seeker.",
    ),
    (
        "3.txt",
        "Diagon Alley is a cobblestoned shopping street hidden behind the Leaky Cauldron.",
    ),
];

fn write_corpus(data_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)?;
    for (name, text) in CORPUS {
        fs::write(data_dir.join(name), text)?;
    }
    fs::write(data_dir.join("notes.md"), "ignored")
}

fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: root.join("data"),
        store_dir: root.join("embeddings"),
        index_path: root.join("index").join("flat.index"),
        top_k: 3,
        ..PipelineConfig::default()
    }
}

#[test]
fn folder_to_answers() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    write_corpus(&config.data_dir)?;
    let embedder = Embedder::new(CharacterNgramEmbedder::default());

    let report = build_corpus(&config, &embedder)?;
    assert_eq!(report.files_chunked, 3);
    assert_eq!(report.skipped_files.len(), 1);

    let snapshot = load_snapshot(&config.store_dir)?;
    assert_eq!(snapshot.chunks.len(), report.chunk_count);
    assert_eq!(snapshot.embeddings.rows(), report.chunk_count);
    for chunk in &snapshot.chunks {
        assert!(!chunk.text.is_empty());
        assert!(chunk.text.chars().count() <= config.chunking.chunk_size);
        assert!(!chunk.text.contains("[1]"));
        assert!(!chunk.text.contains("Rowling"));
        assert!(!chunk.text.contains("Chapter 1"));
    }

    let retriever = Retriever::open(&config, &embedder)?;
    assert_eq!(retriever.len(), report.chunk_count);

    let results = retriever.retrieve("Golden Snitch Seeker")?;
    assert_eq!(results.len(), 3);
    assert!(results[0].text.contains("Snitch"));
    for (position, result) in results.iter().enumerate() {
        assert_eq!(result.rank, position + 1);
    }
    assert!(results.windows(2).all(|pair| pair[0].score <= pair[1].score));

    let everything = retriever.retrieve_top("Privet Drive", 10_000)?;
    assert_eq!(everything.len(), report.chunk_count);
    Ok(())
}

#[test]
fn every_row_is_its_own_nearest_neighbor() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = PipelineConfig {
        chunking: ChunkingConfig {
            chunk_size: 60,
            chunk_overlap: 10,
        },
        ..config_in(dir.path())
    };
    write_corpus(&config.data_dir)?;
    let embedder = Embedder::new(CharacterNgramEmbedder::default());
    build_corpus(&config, &embedder)?;

    let snapshot = load_snapshot(&config.store_dir)?;
    let index = rag_index_core::FlatIndex::load(&config.index_path)?;
    assert_eq!(index.dimensions(), snapshot.embeddings.dimensions());

    for (row, vector) in snapshot.embeddings.iter_rows().enumerate() {
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let hits = rag_index_core::search_index(&index, vector, 1, None)?;
        assert!(hits[0].score < 1e-6);
        let nearest = snapshot.embeddings.row(hits[0].row).ok_or("row out of range")?;
        assert_eq!(nearest, vector);
    }
    Ok(())
}

#[test]
fn rebuild_replaces_previous_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    write_corpus(&config.data_dir)?;
    let embedder = Embedder::new(CharacterNgramEmbedder::default());

    let first = build_corpus(&config, &embedder)?;
    fs::remove_file(config.data_dir.join("3.txt"))?;
    let second = build_corpus(&config, &embedder)?;

    assert_ne!(first.snapshot_id, second.snapshot_id);
    let retriever = Retriever::open(&config, &embedder)?;
    assert_eq!(retriever.manifest().snapshot_id, second.snapshot_id);
    let results = retriever.retrieve_top("Diagon Alley Leaky Cauldron", 100)?;
    assert!(results.iter().all(|result| !result.text.contains("Cauldron")));
    Ok(())
}

#[test]
fn concurrent_queries_share_one_retriever() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    write_corpus(&config.data_dir)?;
    let embedder = Embedder::new(CharacterNgramEmbedder::default());
    build_corpus(&config, &embedder)?;

    let retriever = Retriever::open(&config, &embedder)?;
    let queries = ["broomsticks", "Privet Drive", "shopping street", "Seeker", "   "];
    let expected = queries
        .iter()
        .map(|query| retriever.retrieve(query).ok())
        .collect::<Vec<_>>();

    std::thread::scope(|scope| {
        let handles = (0..8)
            .map(|worker| {
                let retriever = &retriever;
                let expected = &expected;
                scope.spawn(move || {
                    for round in 0..20 {
                        let slot = (worker + round) % queries.len();
                        match (retriever.retrieve(queries[slot]), &expected[slot]) {
                            (Ok(results), Some(wanted)) => assert_eq!(&results, wanted),
                            (Err(RetrievalError::InvalidQuery(_)), None) => {}
                            (other, wanted) => {
                                panic!("query {slot}: got {other:?}, wanted {wanted:?}")
                            }
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
    });
    Ok(())
}
