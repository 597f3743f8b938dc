//! DNS and HTTP/keyword validation stages, plus the persona/proxy rotation
//! machinery they share.

pub mod dns;
pub mod http;
pub mod keywords;
pub mod rotation;

pub use dns::{
    DnsResolver, DnsResolverProvider, DnsValidationRunner, HickoryDnsResolver,
    HickoryResolverProvider, ResolveFailure,
};
pub use http::{
    FetchFailure, FetchedPage, HttpFetcher, HttpFetcherProvider, HttpKeywordRunner,
    ReqwestFetcher, ReqwestFetcherProvider,
};
pub use keywords::KeywordScanner;
pub use rotation::{PersonaRotator, ProxySelector};
