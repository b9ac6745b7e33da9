//! `sol!` bindings for the task registry contract.

use alloy_sol_types::sol;

sol! {
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[sol(rpc)]
    contract TaskRegistry {
        struct TaskInfo {
            uint8 status;
            uint8 abortReason;
            uint8 taskError;
            bytes32 samplingSeed;
            uint256 sequence;
        }

        function createTask(
            uint8 taskType,
            bytes32 taskIDCommitment,
            uint256 taskFee,
            string taskVersion,
            string[] modelIDs,
            uint256 minVram,
            string requiredGPU,
            uint256 requiredGPUVram,
            uint256 taskSize
        ) external payable;

        function validateSingleTask(
            bytes32 taskIDCommitment,
            bytes vrfProof,
            bytes publicKey
        ) external;

        function validateTaskGroup(
            bytes32 taskIDCommitment1,
            bytes32 taskIDCommitment2,
            bytes32 taskIDCommitment3,
            bytes32 taskID,
            bytes vrfProof,
            bytes publicKey
        ) external;

        function getTask(bytes32 taskIDCommitment) external view returns (TaskInfo info);
    }
}
