mod points_fetcher;

pub use points_fetcher::PointsFetcher;
