pub mod campaigns;
pub mod ws;
