//! Crawler module for covers, scheduling and schedule sync
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching and response classification
//! - HTML and feed parsing
//! - Reporters and their middleware pipelines
//! - Covers (one crawl run per schedule)
//! - The periodic scheduler and its pub/sub persister

mod cover;
mod fetcher;
mod parser;
mod persister;
mod pipeline;
mod reporter;
mod scheduler;

pub use cover::Cover;
pub use fetcher::{build_http_client, fetch_url, FetchResult};
pub use parser::{extract_links, Document, FeedParser, HtmlParser, ParseError, Parser, Readable};
pub use persister::{
    Channels, MemoryPubSub, Message, MessageStream, Persister, PubSub, PubSubError, RedisPubSub,
};
pub use pipeline::{
    dispatch_middleware, fetch_middleware, DispatchMiddleware, FetchMiddleware, Middleware,
    Pipeline,
};
pub use reporter::{
    DispatchFn, DispatchFuture, FetchFn, FetchFuture, ParserSet, Reporter, ReporterKind,
    RunContext,
};
pub use scheduler::{
    CoverHooks, FailureHook, JobCompletion, JobExecutor, JobHandle, Scheduler, StartHook,
    SuccessHook, TokioExecutor,
};
