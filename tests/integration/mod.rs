mod earnings_update;
mod edgar_probe;
mod iex_price_update;
mod reference_data;
