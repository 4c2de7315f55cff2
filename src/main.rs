//! CLI interface for the vector database

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use vectordb_embedded::{
    AttrValue, CollectionMetadata, CollectionMetadataPatch, CollectionStore, EmbeddingPatch,
    EmbeddingRecord, GetQuery, NewEmbedding, SearchQuery, Settings, Vector, Where,
};

#[derive(Parser)]
#[command(name = "vectordb")]
#[command(about = "An embedded vector database with named collections", long_about = None)]
struct Cli {
    /// Data directory. Defaults to $VECTORDB_PERSIST_DIR, then ./vectordb_data.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Record store commits between checkpoints.
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a collection
    Create {
        name: String,
        /// Embedding dimensionality
        #[arg(short, long)]
        dim: usize,
        /// Initial index capacity
        #[arg(long)]
        max_elements: Option<usize>,
        /// HNSW neighbor-list size
        #[arg(long)]
        m: Option<usize>,
        /// Capacity multiplier when the index grows
        #[arg(long)]
        resize_factor: Option<f64>,
        /// Return the existing collection instead of failing
        #[arg(long)]
        get_or_create: bool,
    },
    /// List collections
    Collections,
    /// Rename a collection or change its metadata
    Alter {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        dim: Option<usize>,
        #[arg(long)]
        max_elements: Option<usize>,
        #[arg(long)]
        m: Option<usize>,
        #[arg(long)]
        resize_factor: Option<f64>,
    },
    /// Add an embedding to a collection
    Add {
        collection: String,
        id: String,
        /// Vector data as comma-separated values (e.g., "1.0,2.0,3.0")
        #[arg(short, long)]
        vector: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Update an embedding in place
    Update {
        collection: String,
        id: String,
        #[arg(short, long)]
        vector: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Fetch embeddings by filter
    Get {
        /// Restrict to one collection
        #[arg(short, long)]
        collection: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Search for nearest neighbors
    Search {
        collection: String,
        /// Query vector as comma-separated values
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Count the embeddings of a collection
    Count { collection: String },
    /// Delete embeddings
    Delete {
        collection: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show the first rows of a collection
    Peek {
        collection: String,
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Drop a collection's persisted index
    DropIndex { collection: String },
    /// Print store statistics as JSON
    Stats,
}

#[derive(Args)]
struct FieldArgs {
    #[arg(long)]
    document: Option<String>,
    #[arg(long)]
    document_id: Option<String>,
    #[arg(long)]
    arg1: Option<String>,
    #[arg(long)]
    arg2: Option<String>,
    #[arg(long)]
    arg3: Option<String>,
}

#[derive(Args)]
struct FilterArgs {
    /// Comma-separated ids
    #[arg(long, value_delimiter = ',')]
    ids: Option<Vec<String>>,
    #[arg(long)]
    document_id: Option<String>,
    #[arg(long)]
    arg1: Option<String>,
    #[arg(long)]
    arg2: Option<String>,
    #[arg(long)]
    arg3: Option<String>,
}

impl FilterArgs {
    fn into_where(self) -> Where {
        Where {
            ids: self.ids,
            document_id: self.document_id,
            embedding: None,
            arg1: self.arg1.as_deref().map(AttrValue::parse),
            arg2: self.arg2.as_deref().map(AttrValue::parse),
            arg3: self.arg3.as_deref().map(AttrValue::parse),
        }
    }
}

fn print_records(records: &[EmbeddingRecord]) {
    if records.is_empty() {
        println!("No embeddings found");
        return;
    }
    println!("Embeddings ({} total):", records.len());
    for r in records {
        println!(
            "  - {} doc_id={} document={:?} vector={:?}",
            r.id,
            r.document_id.as_deref().unwrap_or("-"),
            r.document.as_deref().unwrap_or(""),
            r.embedding.as_slice()
        );
    }
}

fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(dir) = &cli.data_dir {
        settings.persist_directory = dir.clone();
    }
    if let Some(interval) = cli.checkpoint_interval {
        settings.checkpoint_interval = interval;
    }
    Ok(settings)
}

fn run(store: &CollectionStore<vectordb_embedded::DurableRecordStore>, command: Commands) -> Result<()> {
    match command {
        Commands::Create {
            name,
            dim,
            max_elements,
            m,
            resize_factor,
            get_or_create,
        } => {
            let metadata = CollectionMetadata {
                dimensionality: dim,
                max_elements,
                m,
                resize_factor,
            };
            let c = store.create_collection(&name, metadata, get_or_create)?;
            println!("Collection {} ({})", c.name, c.id);
        }
        Commands::Collections => {
            let collections = store.list_collections()?;
            if collections.is_empty() {
                println!("No collections");
            } else {
                println!("Collections ({} total):", collections.len());
                for c in collections {
                    println!("  - {} ({}, dim {})", c.name, c.id, c.metadata.dimensionality);
                }
            }
        }
        Commands::Alter {
            name,
            rename,
            dim,
            max_elements,
            m,
            resize_factor,
        } => {
            let patch = CollectionMetadataPatch {
                dimensionality: dim,
                max_elements,
                m,
                resize_factor,
            };
            let c = store.update_collection(&name, rename.as_deref(), &patch)?;
            println!("Updated collection {} ({})", c.name, c.id);
        }
        Commands::Add {
            collection,
            id,
            vector,
            fields,
        } => {
            // Registers the index, which may not be cached yet in a fresh process
            store.get_collection(&collection)?;
            let mut embedding = NewEmbedding::new(id.clone(), Vector::from_str(&vector)?).with_args(
                fields.arg1.as_deref().map(AttrValue::parse),
                fields.arg2.as_deref().map(AttrValue::parse),
                fields.arg3.as_deref().map(AttrValue::parse),
            );
            embedding.document = fields.document;
            embedding.document_id = fields.document_id;
            store.add_embeddings(&collection, vec![embedding])?;
            println!("Added embedding {} to {}", id, collection);
        }
        Commands::Update {
            collection,
            id,
            vector,
            fields,
        } => {
            let patch = EmbeddingPatch {
                embedding: vector.as_deref().map(Vector::from_str).transpose()?,
                document: fields.document,
                document_id: fields.document_id,
                arg1: fields.arg1.as_deref().map(AttrValue::parse),
                arg2: fields.arg2.as_deref().map(AttrValue::parse),
                arg3: fields.arg3.as_deref().map(AttrValue::parse),
            };
            store.update_embedding(&collection, &id, patch)?;
            println!("Updated embedding {}", id);
        }
        Commands::Get {
            collection,
            filter,
            limit,
            offset,
        } => {
            let query = GetQuery {
                collection_name: collection,
                filter: filter.into_where(),
                limit,
                offset,
            };
            print_records(&store.get(&query)?);
        }
        Commands::Search {
            collection,
            query,
            k,
            filter,
        } => {
            let q = Vector::from_str(&query)?;
            let query = SearchQuery::new(collection, q, k).with_filter(filter.into_where());
            let hits = store.get_nearest_neighbors(&query)?;

            if hits.is_empty() {
                println!("No results found");
            } else {
                println!("Top {} results:", hits.len());
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. {} (distance: {:.4}) {}",
                        i + 1,
                        hit.id,
                        hit.distance,
                        hit.document.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Count { collection } => {
            println!("{}", store.count(&collection)?);
        }
        Commands::Delete { collection, ids } => {
            store.delete_embeddings(&collection, &ids)?;
            println!("Deleted {} embedding(s) from {}", ids.len(), collection);
        }
        Commands::Peek { collection, n } => {
            print_records(&store.peek(&collection, n)?);
        }
        Commands::DropIndex { collection } => {
            store.drop_collection_index(&collection)?;
            println!("Dropped index of {}", collection);
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = settings(&cli)?;
    let store = CollectionStore::open(&settings).with_context(|| {
        format!(
            "failed to open store at {}",
            settings.persist_directory.display()
        )
    })?;
    run(&store, cli.command)
}
