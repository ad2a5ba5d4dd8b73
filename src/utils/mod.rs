// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/utils/mod.rs
// Version: 1.0.0
//
// Utility functions shared by the runner and the benchmark binary.
//
// Tree Location:
// - src/utils/mod.rs (utils module entry point)
// - Submodules: format

pub mod format;
