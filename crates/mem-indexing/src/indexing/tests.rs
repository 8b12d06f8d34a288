
mod chunk_scenarios;
mod scope_scenarios;
mod search_scenarios;
