pub mod profiler;
