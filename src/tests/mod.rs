mod pipeline_selftest;
mod ring_selftest;
