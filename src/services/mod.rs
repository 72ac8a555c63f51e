pub mod vehicle_feed;
