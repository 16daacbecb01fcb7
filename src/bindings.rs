// src/bindings.rs
use ethers::abi::AbiEncode;
use ethers::prelude::abigen;
use ethers::types::{Address, Bytes, U256};

abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce)
        function getDepositInfo(address account) external view returns (uint256 deposit, bool staked, uint112 stake, uint32 unstakeDelaySec, uint48 withdrawTime)
    ]"#;

    GaslessPaymaster,
    r#"[
        function cachedPrice() external view returns (uint208 price, uint48 updatedAt)
        function tokenPrices(address token) external view returns (uint256)
        function balances(address user, address token) external view returns (uint256)
        function updatePrice() external
        function depositFor(address user, address token, uint256 amount) external
        event PostOpProcessed(address indexed user, address indexed token, uint256 actualGasCostWei, uint256 tokenCost, uint256 protocolRevenue)
    ]"#;

    GasToken,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#;

    SimpleAccount,
    r#"[
        function execute(address dest, uint256 value, bytes func) external
    ]"#;
);

/// `SimpleAccount.execute(target, value, data)` call data.
pub fn encode_execution(target: Address, value: U256, data: Bytes) -> Bytes {
    simple_account::ExecuteCall {
        dest: target,
        value,
        func: data,
    }
    .encode()
    .into()
}

/// ERC-20 `transfer(to, amount)` call data.
pub fn encode_token_transfer(to: Address, amount: U256) -> Bytes {
    gas_token::TransferCall { to, amount }.encode().into()
}
