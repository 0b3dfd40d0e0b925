pub mod data_feed;
